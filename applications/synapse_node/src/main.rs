// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::{process, sync::Arc};

use clap::Parser;
use log::*;
use synapse_common_types::{shutdown::Shutdown, Timestamp};
use synapse_crypto::load_or_create_identity;
use synapse_node::{
    bootstrap::spawn_services,
    cli::Cli,
    config,
    config::ApplicationConfig,
    exit_codes::{ExitCode, ExitError},
    http::{spawn_http, ApiContext},
    node::SynapseNode,
    p2p::LoopbackHub,
};
use synapse_state::{StateStore, StorageError};
use tokio::runtime::{self, Runtime};

const LOG_TARGET: &str = "synapse::node::app";

fn main() {
    if let Err(err) = main_inner() {
        let exit_code = err.exit_code;
        eprintln!("{:?}", err);
        error!(
            target: LOG_TARGET,
            "Exiting with code ({}): {:?}", exit_code as i32, exit_code
        );
        process::exit(exit_code as i32);
    }
}

fn main_inner() -> Result<(), ExitError> {
    let cli = Cli::parse();

    let log_config = cli.log_config_path();
    config::ensure_log_config(&log_config).map_err(|e| ExitError::new(ExitCode::ConfigError, e))?;
    log4rs::init_file(&log_config, Default::default()).map_err(|e| ExitError::new(ExitCode::ConfigError, e))?;

    let app_config =
        ApplicationConfig::load_from(&cli).map_err(|e| ExitError::new(ExitCode::ConfigError, e))?;
    config::ensure_directories_exist(&app_config).map_err(|e| ExitError::new(ExitCode::ConfigError, e))?;

    let runtime = build_runtime()?;
    runtime.block_on(run_node(app_config))
}

async fn run_node(config: ApplicationConfig) -> Result<(), ExitError> {
    let keypair = load_or_create_identity(config.identity_file())
        .map_err(|e| ExitError::new(ExitCode::IdentityFailure, e))?;
    println!("Starting Synapse-NG node {}", keypair.node_id());
    info!(target: LOG_TARGET, "🚀 Node starting with id {}", keypair.node_id());

    let store = StateStore::initialize(config.data_dir(), keypair.node_id(), config.network.clone())
        .map_err(|e| match e {
            StorageError::CorruptSnapshot(_) => ExitError::new(ExitCode::SnapshotCorruption, e),
            other => ExitError::new(ExitCode::ConfigError, other),
        })?;

    let shutdown = Shutdown::new();

    // Single-process transport; a networked deployment connects the real
    // peer-to-peer transport through the same contract
    let hub = LoopbackHub::new();
    let (transport, rx_inbound) = hub.connect();

    let services = spawn_services(
        &config,
        keypair,
        store,
        Arc::new(transport),
        rx_inbound,
        shutdown.to_signal(),
    )
    .await?;

    let context = Arc::new(ApiContext {
        keypair: services.keypair.clone(),
        store: services.store.clone(),
        gossip: services.gossip.clone(),
        executor: services.executor.clone(),
        started_at: Timestamp::now(),
    });
    let addr = spawn_http(config.node.listen_addr, context)?;
    info!(target: LOG_TARGET, "🚀 Synapse node started, API on {}", addr);

    SynapseNode::new(services).start(shutdown).await
}

fn build_runtime() -> Result<Runtime, ExitError> {
    runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ExitError::new(ExitCode::UnknownError, e))
}
