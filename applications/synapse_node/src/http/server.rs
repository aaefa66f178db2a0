// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use log::*;
use tower_http::cors::CorsLayer;

use super::handlers::{self, ApiContext};

const LOG_TARGET: &str = "synapse::node::http";

pub fn build_router(context: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/state", get(handlers::get_state))
        .route("/whoami", get(handlers::whoami))
        .route("/health", get(handlers::health))
        .route("/peers", get(handlers::get_peers))
        .route("/config", get(handlers::get_config))
        .route("/validators", get(handlers::get_validators))
        .route("/commands", get(handlers::get_commands))
        .route("/commands/:command_id", get(handlers::get_command))
        .route("/balances/:node_id", get(handlers::get_balance))
        .route("/schemas", get(handlers::get_schemas))
        .route("/schemas/validate", post(handlers::validate_schema))
        .route("/schemas/:name", get(handlers::get_schema))
        .route("/tasks", post(handlers::create_task))
        .route("/tasks/:task_id/claim", post(handlers::claim_task))
        .route("/tasks/:task_id/progress", post(handlers::progress_task))
        .route("/tasks/:task_id/complete", post(handlers::complete_task))
        .route("/tasks/:task_id/delete", post(handlers::delete_task))
        .route("/tasks/:task_id/auction/start", post(handlers::start_auction))
        .route("/tasks/:task_id/bid", post(handlers::bid_task))
        .route("/proposals", post(handlers::create_proposal))
        .route("/proposals/:proposal_id/vote", post(handlers::vote_proposal))
        .route("/proposals/:proposal_id/close", post(handlers::close_proposal))
        .route("/governance/ratify/:proposal_id", post(handlers::ratify_proposal))
        .route("/tools/:tool_id/execute", post(handlers::execute_tool))
        .route("/channels/:channel/subscribe", post(handlers::subscribe_channel))
        .route("/channels/:channel/unsubscribe", post(handlers::unsubscribe_channel))
        .layer(Extension(context))
        .layer(CorsLayer::permissive())
}

/// Binds and serves the API on its own task, falling back to an OS-assigned
/// port when the preferred address is taken.
pub fn spawn_http(mut preferred_address: SocketAddr, context: Arc<ApiContext>) -> Result<SocketAddr, anyhow::Error> {
    let router = build_router(context);

    let server = axum::Server::try_bind(&preferred_address).or_else(|_| {
        error!(
            target: LOG_TARGET,
            "🌐 Failed to bind on preferred address {}. Trying OS-assigned", preferred_address
        );
        preferred_address.set_port(0);
        axum::Server::try_bind(&preferred_address)
    })?;
    let server = server.serve(router.into_make_service());
    let addr = server.local_addr();
    info!(target: LOG_TARGET, "🌐 HTTP API listening on {}", addr);
    tokio::spawn(server);

    Ok(addr)
}
