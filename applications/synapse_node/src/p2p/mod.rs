// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

pub mod gossip;
mod transport;

pub use transport::{GossipTransport, InboundFrame, LoopbackHub, LoopbackTransport};
