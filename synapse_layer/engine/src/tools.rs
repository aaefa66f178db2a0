// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Common-tool maintenance billing and authorized execution.
//!
//! Execution passes three gates in order (tool active, caller is the
//! assignee of a live task, tool listed in the task's required tools); any
//! failure is a uniform Forbidden so callers cannot probe which gate broke.
//! Decrypted credentials live in zeroizing buffers and never reach logs.

use log::*;
use serde::Deserialize;
use serde_json::{json, Value};
use synapse_common_types::{optional::IsNotFoundError, ChannelId, NodeId, TaskId, Timestamp, ToolId};
use synapse_crypto::AeadError;
use synapse_state::models::{CommonTool, NetworkState, TaskStatus, ToolKind, ToolStatus};
use zeroize::{Zeroize, ZeroizeOnDrop};

const LOG_TARGET: &str = "synapse::engine::tools";

pub const TOOL_EXECUTION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {tool_id}")]
    NotFound { tool_id: ToolId },
    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },
    #[error("Failed to decrypt tool credentials: {0}")]
    Decrypt(#[from] AeadError),
    #[error("Tool credentials are malformed")]
    CredentialFormat,
    #[error("Tool call failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl IsNotFoundError for ToolError {
    fn is_not_found_error(&self) -> bool {
        matches!(self, ToolError::NotFound { .. })
    }
}

fn forbidden<T: Into<String>>(reason: T) -> ToolError {
    ToolError::Forbidden { reason: reason.into() }
}

/// The three authorization gates, checked in order. Returns the tool on
/// success so the caller can execute without re-reading state.
pub fn authorize_execution(
    state: &NetworkState,
    channel_id: &ChannelId,
    tool_id: &ToolId,
    caller: &NodeId,
    task_id: &TaskId,
) -> Result<CommonTool, ToolError> {
    let channel = state
        .channel(channel_id)
        .ok_or_else(|| forbidden("tool is not available in this channel"))?;

    // Gate 1: the tool exists and is active
    let tool = channel
        .common_tools
        .get(tool_id)
        .ok_or_else(|| forbidden("tool is not available in this channel"))?;
    if !tool.is_active() {
        return Err(forbidden("tool is not active"));
    }

    // Gate 2: the caller is the assignee of a live task
    let task = channel
        .tasks
        .get(task_id)
        .ok_or_else(|| forbidden("task does not authorize this call"))?;
    if task.assignee.as_ref() != Some(caller) {
        return Err(forbidden("caller is not the task assignee"));
    }
    if !matches!(task.status, TaskStatus::Claimed | TaskStatus::InProgress) {
        return Err(forbidden("task is not in a working status"));
    }

    // Gate 3: the task actually requires this tool
    if !task.required_tools.contains(tool_id) {
        return Err(forbidden("tool is not required by this task"));
    }

    Ok(tool.clone())
}

/// Decrypted credential material. Zeroized on drop; must never be logged
/// or serialized.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct ToolCredential {
    endpoint: String,
    #[serde(default)]
    token: Option<String>,
}

pub struct ToolExecutor {
    client: reqwest::Client,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(TOOL_EXECUTION_TIMEOUT_SECS))
            .build()
            .expect("default TLS backend is always available");
        Self { client }
    }

    /// Performs the tool-type-specific call with the provided body. The
    /// caller must have passed [`authorize_execution`].
    pub async fn execute(
        &self,
        channel_id: &ChannelId,
        tool: &CommonTool,
        body: &Value,
    ) -> Result<Value, ToolError> {
        let key = synapse_crypto::derive_channel_key(channel_id);
        let plaintext = synapse_crypto::decrypt(&key, &tool.encrypted_credentials)?;
        let credential = parse_credential(tool.kind, &plaintext)?;
        drop(plaintext);

        let mut request = self.client.post(&credential.endpoint).json(body);
        if let Some(token) = &credential.token {
            request = request.bearer_auth(token);
        }
        debug!(target: LOG_TARGET, "Executing tool {} in {}", tool.tool_id, channel_id);
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(json!({ "status": status, "body": body }))
    }
}

fn parse_credential(kind: ToolKind, plaintext: &[u8]) -> Result<ToolCredential, ToolError> {
    if let Ok(credential) = serde_json::from_slice::<ToolCredential>(plaintext) {
        return Ok(credential);
    }
    // Webhook credentials may be a bare URL rather than a JSON object
    if kind == ToolKind::Webhook {
        let url = std::str::from_utf8(plaintext).map_err(|_| ToolError::CredentialFormat)?;
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(ToolCredential {
                endpoint: url.to_string(),
                token: None,
            });
        }
    }
    Err(ToolError::CredentialFormat)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BillingReport {
    pub paid: usize,
    pub suspended: usize,
    pub reactivated: usize,
}

/// One billing tick over every channel. Active tools past the billing
/// period pay or fall into `inactive_funding_issue`; inactive tools retry
/// every tick and come back once the treasury can cover them. Deprecated
/// tools are never billed.
pub fn run_billing_cycle(state: &mut NetworkState, now: Timestamp) -> BillingReport {
    let period_secs = state.config.common_tools_billing_period_days as i64 * 86_400;
    let mut report = BillingReport::default();

    for (channel_id, channel) in state.channels.iter_mut() {
        let tool_ids: Vec<ToolId> = channel.common_tools.keys().cloned().collect();
        for tool_id in tool_ids {
            let tool = channel.common_tools.get(&tool_id).expect("id taken from key set");
            let action = match tool.status {
                ToolStatus::Deprecated => continue,
                ToolStatus::Active => {
                    if now.seconds_since(tool.last_payment_at) < period_secs {
                        continue;
                    }
                    if channel.treasury_balance >= tool.monthly_cost_sp {
                        BillingAction::Pay
                    } else {
                        BillingAction::Suspend
                    }
                },
                ToolStatus::InactiveFundingIssue => {
                    if channel.treasury_balance >= tool.monthly_cost_sp {
                        BillingAction::Reactivate
                    } else {
                        continue;
                    }
                },
            };

            let tool = channel.common_tools.get_mut(&tool_id).expect("id taken from key set");
            match action {
                BillingAction::Pay => {
                    channel.treasury_balance -= tool.monthly_cost_sp;
                    tool.last_payment_at = now;
                    tool.updated_at = now;
                    report.paid += 1;
                },
                BillingAction::Suspend => {
                    warn!(
                        target: LOG_TARGET,
                        "💸 Tool {} in {} suspended: treasury {} < {} SP",
                        tool_id,
                        channel_id,
                        channel.treasury_balance,
                        tool.monthly_cost_sp
                    );
                    tool.status = ToolStatus::InactiveFundingIssue;
                    tool.updated_at = now;
                    report.suspended += 1;
                },
                BillingAction::Reactivate => {
                    channel.treasury_balance -= tool.monthly_cost_sp;
                    tool.status = ToolStatus::Active;
                    tool.last_payment_at = now;
                    tool.updated_at = now;
                    info!(target: LOG_TARGET, "Tool {} in {} reactivated", tool_id, channel_id);
                    report.reactivated += 1;
                },
            }
        }
    }
    report
}

enum BillingAction {
    Pay,
    Suspend,
    Reactivate,
}
