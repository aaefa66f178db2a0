// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use blake2::Blake2b;
use digest::{consts::U16, Digest};
use serde::{Deserialize, Serialize};
use synapse_common_types::{ChannelId, CommandId, NodeId, ProposalId, Timestamp, ToolId};

use super::tool::ToolKind;
use crate::schema::SchemaDefinition;

type Blake2b128 = Blake2b<U16>;

/// A ratified, deterministic mutation. Every variant has exactly one handler;
/// adding an operation is a new variant plus a match arm in the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    SetConfig {
        key: String,
        value: serde_json::Value,
    },
    UpdateSchema {
        name: String,
        definition: SchemaDefinition,
    },
    SplitChannel {
        source: ChannelId,
        /// Tag sets routing entities into each target channel. Entities
        /// matching no target stay in the source.
        targets: Vec<ChannelSplitTarget>,
    },
    MergeChannels {
        sources: Vec<ChannelId>,
        target: ChannelId,
    },
    AcquireCommonTool {
        channel: ChannelId,
        tool_id: ToolId,
        #[serde(rename = "type")]
        kind: ToolKind,
        description: String,
        monthly_cost_sp: u64,
        credentials_to_encrypt: String,
    },
    DeprecateCommonTool {
        channel: ChannelId,
        tool_id: ToolId,
    },
    UpdateReputationFormula {
        base_offset: f64,
        base_scale: f64,
        bonus_scale: f64,
    },
    /// Validated and recorded only; execution is delegated to the
    /// self-upgrade collaborator outside this core.
    CodeUpgrade {
        package_hash: String,
        version: String,
        url: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetConfig { .. } => "set_config",
            Operation::UpdateSchema { .. } => "update_schema",
            Operation::SplitChannel { .. } => "split_channel",
            Operation::MergeChannels { .. } => "merge_channels",
            Operation::AcquireCommonTool { .. } => "acquire_common_tool",
            Operation::DeprecateCommonTool { .. } => "deprecate_common_tool",
            Operation::UpdateReputationFormula { .. } => "update_reputation_formula",
            Operation::CodeUpgrade { .. } => "code_upgrade",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSplitTarget {
    pub channel: ChannelId,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn ok_with(detail: serde_json::Value) -> Self {
        Self {
            success: true,
            error: None,
            detail,
        }
    }

    pub fn failed<T: Into<String>>(reason: T) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            detail: serde_json::Value::Null,
        }
    }
}

/// One entry of the append-only execution log. `executed_at` and `result`
/// are filled in locally by the dispatcher; `result` is deterministic and
/// therefore converges, `executed_at` is volatile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutedCommand {
    pub command_id: CommandId,
    pub proposal_id: ProposalId,
    pub operation: Operation,
    pub ratified_at: Timestamp,
    pub ratified_by: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandOutcome>,
}

/// Deterministic command id: hash of the proposal id plus the sorted
/// ratifier set. Every node that observes the same majority derives the
/// same id.
pub fn derive_command_id(proposal_id: &ProposalId, ratified_by: &[NodeId]) -> CommandId {
    let mut hasher = Blake2b128::new();
    hasher.update(proposal_id.as_str().as_bytes());
    let mut sorted = ratified_by.to_vec();
    sorted.sort();
    for node in &sorted {
        hasher.update(b"\x00");
        hasher.update(node.as_str().as_bytes());
    }
    CommandId::new(format!("cmd_{}", hex::encode(hasher.finalize())))
}
