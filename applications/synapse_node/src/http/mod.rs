// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

mod error;
mod handlers;
mod server;

pub use error::ApiError;
pub use handlers::ApiContext;
pub use server::{build_router, spawn_http};
