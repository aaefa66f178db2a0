// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use serde::{Deserialize, Serialize};

/// The replicated tunables. Seeded from the application config on first
/// boot, thereafter mutated only by ratified `config_change`/`set_config`
/// commands so all nodes converge on the same values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub gossip_interval_seconds: u64,
    pub proposal_voting_period_seconds: u64,
    pub initial_balance_sp: i64,
    pub transaction_tax_percentage: f64,
    pub validator_set_size: usize,
    pub approval_ratio: f64,
    pub reputation_decay_factor: f64,
    pub reputation_decay_interval_seconds: u64,
    pub common_tools_billing_interval_seconds: u64,
    pub common_tools_billing_period_days: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            gossip_interval_seconds: 5,
            proposal_voting_period_seconds: 86_400,
            initial_balance_sp: 1000,
            transaction_tax_percentage: 0.02,
            validator_set_size: 7,
            approval_ratio: 1.0,
            reputation_decay_factor: 0.99,
            reputation_decay_interval_seconds: 86_400,
            common_tools_billing_interval_seconds: 86_400,
            common_tools_billing_period_days: 30,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigKeyError {
    #[error("Unknown config key: {key}")]
    UnknownKey { key: String },
    #[error("Invalid value for config key {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl NetworkConfig {
    /// Assigns a single key from a JSON value. The key must be in the known
    /// set; this is the validation performed by the `set_config` handler.
    pub fn set(&mut self, key: &str, value: &serde_json::Value) -> Result<(), ConfigKeyError> {
        match key {
            "gossip_interval_seconds" => self.gossip_interval_seconds = as_u64(key, value)?,
            "proposal_voting_period_seconds" => self.proposal_voting_period_seconds = as_u64(key, value)?,
            "initial_balance_sp" => self.initial_balance_sp = as_i64(key, value)?,
            "transaction_tax_percentage" => self.transaction_tax_percentage = as_f64(key, value)?,
            "validator_set_size" => {
                let n = as_u64(key, value)?;
                if n == 0 {
                    return Err(ConfigKeyError::InvalidValue {
                        key: key.to_string(),
                        reason: "validator set must not be empty".to_string(),
                    });
                }
                self.validator_set_size = n as usize;
            },
            "approval_ratio" => self.approval_ratio = as_f64(key, value)?,
            "reputation_decay_factor" => {
                let f = as_f64(key, value)?;
                if !(0.0..=1.0).contains(&f) {
                    return Err(ConfigKeyError::InvalidValue {
                        key: key.to_string(),
                        reason: "decay factor must be within [0, 1]".to_string(),
                    });
                }
                self.reputation_decay_factor = f;
            },
            "reputation_decay_interval_seconds" => self.reputation_decay_interval_seconds = as_u64(key, value)?,
            "common_tools_billing_interval_seconds" => {
                self.common_tools_billing_interval_seconds = as_u64(key, value)?
            },
            "common_tools_billing_period_days" => self.common_tools_billing_period_days = as_u64(key, value)?,
            _ => {
                return Err(ConfigKeyError::UnknownKey { key: key.to_string() });
            },
        }
        Ok(())
    }
}

fn as_u64(key: &str, value: &serde_json::Value) -> Result<u64, ConfigKeyError> {
    value.as_u64().ok_or_else(|| ConfigKeyError::InvalidValue {
        key: key.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

fn as_i64(key: &str, value: &serde_json::Value) -> Result<i64, ConfigKeyError> {
    value.as_i64().ok_or_else(|| ConfigKeyError::InvalidValue {
        key: key.to_string(),
        reason: "expected an integer".to_string(),
    })
}

fn as_f64(key: &str, value: &serde_json::Value) -> Result<f64, ConfigKeyError> {
    value.as_f64().ok_or_else(|| ConfigKeyError::InvalidValue {
        key: key.to_string(),
        reason: "expected a number".to_string(),
    })
}
