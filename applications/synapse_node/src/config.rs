// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Process-level configuration, layered as file < environment < CLI.
//!
//! The `network` section only *seeds* the replicated [`NetworkConfig`] on
//! first boot; once a snapshot exists, those values are governed by ratified
//! `config_change` proposals, not by this file.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use config::{Config, Environment, File};
use serde::Deserialize;
use synapse_state::models::NetworkConfig;

use crate::cli::Cli;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub base_path: PathBuf,
    pub node: SynapseNodeConfig,
    pub network: NetworkConfig,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("data"),
            node: SynapseNodeConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SynapseNodeConfig {
    /// Signing key location; created on first start, mode 0600.
    pub identity_file: Option<PathBuf>,
    /// Snapshot root; `<data_dir>/<node_id>/state.json`.
    pub data_dir: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    /// Channels to subscribe on startup, in addition to `global`.
    pub channels: Vec<String>,
}

impl Default for SynapseNodeConfig {
    fn default() -> Self {
        Self {
            identity_file: None,
            data_dir: None,
            listen_addr: "127.0.0.1:8000".parse().expect("valid literal address"),
            channels: Vec::new(),
        }
    }
}

impl ApplicationConfig {
    pub fn load_from(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();
        let config_path = cli.config_path();
        if config_path.exists() {
            builder = builder.add_source(File::from(config_path));
        }
        let loaded = builder
            .add_source(Environment::with_prefix("SYNAPSE").separator("__"))
            .build()?;
        let mut app_config: ApplicationConfig = loaded.try_deserialize()?;

        app_config.base_path = cli.base_dir.clone();
        if let Some(listen_addr) = cli.listen_addr {
            app_config.node.listen_addr = listen_addr;
        }
        Ok(app_config)
    }

    pub fn identity_file(&self) -> PathBuf {
        self.node
            .identity_file
            .clone()
            .unwrap_or_else(|| self.base_path.join("identity.key"))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.node.data_dir.clone().unwrap_or_else(|| self.base_path.clone())
    }
}

pub fn ensure_directories_exist(config: &ApplicationConfig) -> std::io::Result<()> {
    std::fs::create_dir_all(config.data_dir())?;
    if let Some(parent) = config.identity_file().parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Writes the bundled log4rs config on first run so operators have a file
/// to edit, then returns the path to load.
pub fn ensure_log_config(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, include_str!("../log4rs_sample.yml"))?;
    }
    Ok(())
}
