// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod exit_codes;
pub mod http;
pub mod node;
pub mod p2p;
pub mod workers;
