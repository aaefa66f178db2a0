// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

pub mod error;
pub mod merge;
pub mod messages;
pub mod models;
pub mod schema;
pub mod store;

pub use error::StorageError;
pub use store::StateStore;
