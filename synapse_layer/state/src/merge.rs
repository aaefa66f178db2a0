// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Last-write-wins merge of incoming replicated objects.
//!
//! Containers merge on `updated_at` with strict greater-than (ties keep
//! local). Vote maps inside proposals and bid maps inside tasks merge
//! per-entry on the entry's own timestamp, independent of the container.
//! Any set of nodes that has received the same set of objects converges to
//! the same state regardless of delivery order.
//!
//! Schema validation happens before objects reach this module; the only
//! rejection originating here is the bounded clock-skew check.

use std::collections::BTreeMap;

use log::*;
use synapse_common_types::{NodeId, TaskId, Timestamp, ToolId};

use crate::models::{CommonTool, ExecutedCommand, NodeRecord, Proposal, ProposalStatus, Task, TaskStatus};

const LOG_TARGET: &str = "synapse::state::merge";

/// Updates stamped further than this ahead of local time are rejected; a
/// node with a fast clock must not be able to monopolize merges.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Object timestamp {remote} is more than {max}s ahead of local time {local}")]
    ClockSkew {
        remote: Timestamp,
        local: Timestamp,
        max: i64,
    },
}

/// What a merge did, with the triggers the caller must act on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Anything in local state changed.
    pub applied: bool,
    /// A task transitioned into `completed` for the first time on this node;
    /// the caller owes exactly one application of the economic and
    /// reputational effects.
    pub newly_completed: bool,
}

fn check_skew(remote: Timestamp, now: Timestamp) -> Result<(), MergeError> {
    if remote.seconds_since(now) > MAX_CLOCK_SKEW_SECS {
        return Err(MergeError::ClockSkew {
            remote,
            local: now,
            max: MAX_CLOCK_SKEW_SECS,
        });
    }
    Ok(())
}

pub fn merge_task(
    tasks: &mut BTreeMap<TaskId, Task>,
    incoming: Task,
    now: Timestamp,
) -> Result<MergeReport, MergeError> {
    check_skew(incoming.updated_at, now)?;

    let Some(local) = tasks.get_mut(&incoming.id) else {
        let newly_completed = incoming.status == TaskStatus::Completed;
        tasks.insert(incoming.id.clone(), incoming);
        return Ok(MergeReport { applied: true, newly_completed });
    };

    // Bids merge per-bidder regardless of which container wins
    let mut merged_bids = local.bids.clone();
    let mut bids_changed = false;
    for (bidder, bid) in &incoming.bids {
        match merged_bids.get(bidder) {
            Some(existing) if existing.submitted_at >= bid.submitted_at => {},
            _ => {
                merged_bids.insert(bidder.clone(), bid.clone());
                bids_changed = true;
            },
        }
    }

    if incoming.updated_at > local.updated_at {
        let newly_completed =
            local.status != TaskStatus::Completed && incoming.status == TaskStatus::Completed;
        *local = incoming;
        local.bids = merged_bids;
        Ok(MergeReport { applied: true, newly_completed })
    } else {
        if !bids_changed {
            debug!(target: LOG_TARGET, "Stale task update ignored: {}", incoming.id);
        }
        local.bids = merged_bids;
        Ok(MergeReport {
            applied: bids_changed,
            newly_completed: false,
        })
    }
}

pub fn merge_proposal(
    proposals: &mut BTreeMap<synapse_common_types::ProposalId, Proposal>,
    incoming: Proposal,
    now: Timestamp,
) -> Result<MergeReport, MergeError> {
    check_skew(incoming.updated_at, now)?;

    let Some(local) = proposals.get_mut(&incoming.id) else {
        proposals.insert(incoming.id.clone(), incoming);
        return Ok(MergeReport { applied: true, ..Default::default() });
    };

    // Ballots merge per-voter on the ballot timestamp
    let mut merged_votes = local.votes.clone();
    let mut votes_changed = false;
    for (voter, ballot) in &incoming.votes {
        match merged_votes.get(voter) {
            Some(existing) if existing.timestamp >= ballot.timestamp => {},
            _ => {
                merged_votes.insert(voter.clone(), *ballot);
                votes_changed = true;
            },
        }
    }

    if incoming.updated_at > local.updated_at {
        *local = incoming;
        if local.status == ProposalStatus::Open {
            local.votes = merged_votes;
        }
        Ok(MergeReport { applied: true, ..Default::default() })
    } else {
        // Votes landing on a closed proposal are ignored (close is the cutoff)
        let applied = votes_changed && local.status == ProposalStatus::Open;
        if applied {
            local.votes = merged_votes;
        }
        Ok(MergeReport { applied, ..Default::default() })
    }
}

pub fn merge_node(
    nodes: &mut BTreeMap<NodeId, NodeRecord>,
    incoming: NodeRecord,
    now: Timestamp,
) -> Result<MergeReport, MergeError> {
    check_skew(incoming.updated_at, now)?;

    let Some(local) = nodes.get_mut(&incoming.id) else {
        nodes.insert(incoming.id.clone(), incoming);
        return Ok(MergeReport { applied: true, ..Default::default() });
    };

    if incoming.updated_at > local.updated_at {
        // last_seen is volatile and local; keep the fresher of the two
        let last_seen = local.last_seen.max(incoming.last_seen);
        *local = incoming;
        local.last_seen = last_seen;
        Ok(MergeReport { applied: true, ..Default::default() })
    } else {
        debug!(target: LOG_TARGET, "Stale node update ignored: {}", incoming.id);
        Ok(MergeReport::default())
    }
}

pub fn merge_tool(
    tools: &mut BTreeMap<ToolId, CommonTool>,
    incoming: CommonTool,
    now: Timestamp,
) -> Result<MergeReport, MergeError> {
    check_skew(incoming.updated_at, now)?;

    let Some(local) = tools.get_mut(&incoming.tool_id) else {
        tools.insert(incoming.tool_id.clone(), incoming);
        return Ok(MergeReport { applied: true, ..Default::default() });
    };

    if incoming.updated_at > local.updated_at {
        *local = incoming;
        Ok(MergeReport { applied: true, ..Default::default() })
    } else {
        Ok(MergeReport::default())
    }
}

/// The execution log is append-only: entries the local node already holds
/// are never replaced, entries past the local tail are appended in order
/// with their volatile execution fields cleared (this node has not executed
/// them yet). A conflicting id at an existing index is dropped with a
/// warning; resolving that would need the byzantine protections that are an
/// explicit non-goal.
pub fn merge_execution_log(local: &mut Vec<ExecutedCommand>, incoming: Vec<ExecutedCommand>) -> usize {
    let mut appended = 0;
    for (index, entry) in incoming.into_iter().enumerate() {
        if index < local.len() {
            if local[index].command_id != entry.command_id {
                warn!(
                    target: LOG_TARGET,
                    "Execution log conflict at index {}: local {} vs incoming {}",
                    index,
                    local[index].command_id,
                    entry.command_id
                );
            }
            continue;
        }
        let mut entry = entry;
        entry.executed_at = None;
        entry.result = None;
        local.push(entry);
        appended += 1;
    }
    appended
}
