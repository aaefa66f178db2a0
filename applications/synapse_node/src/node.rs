// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use log::*;
use synapse_common_types::shutdown::Shutdown;

use crate::{
    bootstrap::Services,
    exit_codes::{ExitCode, ExitError},
};

const LOG_TARGET: &str = "synapse::node::app";

pub struct SynapseNode {
    services: Services,
}

impl SynapseNode {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Runs until ctrl-c, an external shutdown trigger, or a service task
    /// exits with an error.
    pub async fn start(mut self, shutdown: Shutdown) -> Result<(), ExitError> {
        let mut signal = shutdown.to_signal();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(target: LOG_TARGET, "Interrupt received, shutting down");
                    shutdown.trigger();
                },
                _ = signal.wait() => {
                    break;
                },
                result = self.services.on_any_exit() => {
                    shutdown.trigger();
                    return result.map_err(|e| ExitError::new(ExitCode::UnknownError, e));
                },
            }
        }
        Ok(())
    }
}
