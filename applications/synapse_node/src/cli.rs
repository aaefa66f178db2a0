// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "synapse_node", about = "A Synapse-NG network node", version)]
pub struct Cli {
    /// Base directory for identity, state snapshots and logs
    #[arg(long, short = 'b', env = "SYNAPSE_BASE_DIR", default_value = "data")]
    pub base_dir: PathBuf,

    /// Optional TOML config file; defaults to <base_dir>/config.toml when present
    #[arg(long, short = 'c', env = "SYNAPSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the HTTP API listen address
    #[arg(long, env = "SYNAPSE_LISTEN_ADDR")]
    pub listen_addr: Option<std::net::SocketAddr>,

    /// Override the log4rs config file
    #[arg(long, env = "SYNAPSE_LOG_CONFIG")]
    pub log_config: Option<PathBuf>,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.base_dir.join("config.toml"))
    }

    pub fn log_config_path(&self) -> PathBuf {
        self.log_config
            .clone()
            .unwrap_or_else(|| self.base_dir.join("log4rs.yml"))
    }
}
