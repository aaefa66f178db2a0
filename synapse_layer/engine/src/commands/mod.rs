// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! The execution-log dispatcher.
//!
//! Commands are processed strictly in index order. A handler failure is
//! recorded in the log entry and the index still advances; the log never
//! stalls on a bad command. Handlers are deterministic: they read "now"
//! from the command's `ratified_at` and derive any randomness from the
//! command id, so replaying the log yields identical state on every node.

mod handlers;

pub use handlers::execute_operation;
use log::*;
use synapse_common_types::Timestamp;
use synapse_state::models::{NetworkState, ProposalStatus};

const LOG_TARGET: &str = "synapse::engine::commands";

/// Executes every not-yet-executed command in order. Returns how many were
/// processed. Safe to call at any time; a second call is a no-op until the
/// log grows.
pub fn run_pending(state: &mut NetworkState, now: Timestamp) -> usize {
    let mut executed = 0;
    loop {
        let next = (state.last_executed_command_index + 1) as usize;
        if next >= state.execution_log.len() {
            break;
        }
        let entry = state.execution_log[next].clone();
        info!(
            target: LOG_TARGET,
            "⚙️ Executing command {} ({}) at index {}",
            entry.command_id,
            entry.operation.name(),
            next
        );
        let outcome = handlers::execute_operation(state, &entry);
        if !outcome.success {
            warn!(
                target: LOG_TARGET,
                "Command {} failed: {}",
                entry.command_id,
                outcome.error.as_deref().unwrap_or("unknown")
            );
        }
        let success = outcome.success;

        let slot = &mut state.execution_log[next];
        slot.result = Some(outcome);
        slot.executed_at = Some(now);
        state.last_executed_command_index = next as i64;

        if let Some((_, proposal)) = state.find_proposal_mut(&entry.proposal_id) {
            if proposal.status == ProposalStatus::Ratified {
                proposal.status = if success {
                    ProposalStatus::Executed
                } else {
                    ProposalStatus::Failed
                };
                proposal.updated_at = now;
            }
        }
        executed += 1;
    }
    executed
}
