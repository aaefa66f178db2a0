// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! The inbound gossip pipeline: schema validation, CRDT merge, and the
//! one-shot side effects a merge can trigger (completion economics, config
//! changes carried by executed proposals, ratification tallies).
//!
//! Errors from this module are logged and dropped by the caller; nothing is
//! ever propagated back to a potentially untrusted sender.

use log::*;
use synapse_common_types::{NodeId, Timestamp};
use synapse_state::{
    merge::{self, MergeError},
    messages::GossipPayload,
    models::{NetworkState, ProposalStatus, ProposalType},
    schema::{self, SchemaError},
};

use crate::{commands, economy, governance};

const LOG_TARGET: &str = "synapse::engine::ingest";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Schema validation failed: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("Node record id does not match its public key")]
    NodeIdMismatch,
}

/// Applies one verified gossip payload to local state. Returns whether
/// anything changed (callers use this to decide whether to re-gossip).
pub fn apply(
    state: &mut NetworkState,
    sender: &NodeId,
    payload: GossipPayload,
    now: Timestamp,
) -> Result<bool, IngestError> {
    let applied = match payload {
        GossipPayload::Task { channel, task } => {
            let as_value = serde_json::to_value(&task).expect("replicated models serialize infallibly");
            schema::validate(&state.schemas, &task.schema_name, &as_value)?;
            let task_id = task.id.clone();
            let report = {
                let channel_state = state.channel_entry(&channel);
                merge::merge_task(&mut channel_state.tasks, task, now)?
            };
            if report.newly_completed {
                economy::on_task_completed(state, &channel, &task_id, now);
            }
            report.applied
        },
        GossipPayload::Proposal { channel, proposal } => {
            let as_value = serde_json::to_value(&proposal).expect("replicated models serialize infallibly");
            schema::validate(&state.schemas, "proposal_v1", &as_value)?;
            let proposal_id = proposal.id.clone();
            let was_executed_config_change = state
                .channel(&channel)
                .and_then(|c| c.proposals.get(&proposal_id))
                .map(|p| p.status == ProposalStatus::Executed)
                .unwrap_or(false);

            let report = {
                let channel_state = state.channel_entry(&channel);
                merge::merge_proposal(&mut channel_state.proposals, proposal, now)?
            };

            // A config change executed elsewhere takes effect here when its
            // executed proposal record arrives.
            if report.applied && !was_executed_config_change {
                apply_replicated_config_change(state, &channel, &proposal_id);
            }
            report.applied
        },
        GossipPayload::NodeRecord { node } => {
            match synapse_crypto::identity::fingerprint_bytes(&node.public_key) {
                Some(fingerprint) if fingerprint == node.id => {},
                _ => return Err(IngestError::NodeIdMismatch),
            }
            let report = merge::merge_node(&mut state.nodes, node, now)?;
            if report.applied {
                economy::recompute_balances(state);
                governance::recompute_validator_set(state);
            }
            report.applied
        },
        GossipPayload::CommonTool { channel, tool } => {
            let channel_state = state.channel_entry(&channel);
            merge::merge_tool(&mut channel_state.common_tools, tool, now)?.applied
        },
        GossipPayload::RatificationApproval { proposal_id, .. } => {
            match governance::record_ratification(state, &proposal_id, sender.clone(), now) {
                Ok(_) => true,
                Err(e) => {
                    debug!(target: LOG_TARGET, "Ratification from {} ignored: {}", sender, e);
                    false
                },
            }
        },
        GossipPayload::ExecutionLog { entries } => {
            let appended = merge::merge_execution_log(&mut state.execution_log, entries);
            if appended > 0 {
                commands::run_pending(state, now);
            }
            appended > 0
        },
        GossipPayload::Schema { name, definition } => {
            // First writer wins; schema *updates* flow through ratified
            // commands, which are totally ordered.
            if state.schemas.contains_key(&name) {
                false
            } else {
                state.schemas.insert(name, definition);
                true
            }
        },
    };

    if let Some(node) = state.nodes.get_mut(sender) {
        node.last_seen = now;
    }
    Ok(applied)
}

fn apply_replicated_config_change(
    state: &mut NetworkState,
    channel: &synapse_common_types::ChannelId,
    proposal_id: &synapse_common_types::ProposalId,
) {
    let Some(proposal) = state.channel(channel).and_then(|c| c.proposals.get(proposal_id)) else {
        return;
    };
    if proposal.proposal_type != ProposalType::ConfigChange || proposal.status != ProposalStatus::Executed {
        return;
    }
    let key = proposal.params.get("key").and_then(serde_json::Value::as_str).map(str::to_string);
    let value = proposal.params.get("value").cloned();
    if let (Some(key), Some(value)) = (key, value) {
        if let Err(e) = state.config.set(&key, &value) {
            warn!(target: LOG_TARGET, "Replicated config change {} rejected: {}", proposal_id, e);
        }
    }
}
