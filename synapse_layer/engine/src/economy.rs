// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Synapse Point accounting.
//!
//! Node balances are never stored authoritatively: they are recomputed as a
//! deterministic fold over all completed tasks in canonical order, starting
//! from the configured initial balance. The treasury tax of each completion
//! is applied exactly once, at the moment a node first observes the task as
//! completed (locally or through a merge).

use log::*;
use synapse_common_types::{ChannelId, NodeId, TaskId, Timestamp};
use synapse_state::models::{NetworkState, TaskStatus};

use crate::{governance, reputation};

const LOG_TARGET: &str = "synapse::engine::economy";

/// Transaction tax with a floor of one point, so even zero-reward tasks
/// contribute to the treasury.
pub fn tax_for(reward: u64, rate: f64) -> u64 {
    ((reward as f64 * rate).round() as u64).max(1)
}

/// Recomputes `balance_sp` for every known node by folding all completed
/// tasks across all channels sorted by (`completed_at`, task id). The same
/// multiset of tasks yields the same balances on every node.
pub fn recompute_balances(state: &mut NetworkState) {
    let initial = state.config.initial_balance_sp;
    let rate = state.config.transaction_tax_percentage;

    let mut completed: Vec<(Timestamp, TaskId, NodeId, Option<NodeId>, u64)> = state
        .channels
        .values()
        .flat_map(|channel| channel.tasks.values())
        .filter(|task| task.status == TaskStatus::Completed)
        .map(|task| {
            (
                task.completed_at.unwrap_or(task.updated_at),
                task.id.clone(),
                task.creator.clone(),
                task.assignee.clone(),
                task.reward,
            )
        })
        .collect();
    completed.sort();

    for node in state.nodes.values_mut() {
        node.balance_sp = initial;
    }
    for (_, _, creator, assignee, reward) in completed {
        let tax = tax_for(reward, rate);
        if let Some(node) = state.nodes.get_mut(&creator) {
            node.balance_sp -= reward as i64;
        }
        if let Some(assignee) = assignee {
            if let Some(node) = state.nodes.get_mut(&assignee) {
                node.balance_sp += reward as i64 - tax as i64;
            }
        }
    }
}

/// The balance a creator can still commit to new tasks: the folded balance
/// minus rewards frozen in their not-yet-terminal tasks.
pub fn available_balance(state: &NetworkState, node_id: &NodeId) -> i64 {
    let Some(node) = state.node(node_id) else {
        return 0;
    };
    let frozen: i64 = state
        .channels
        .values()
        .flat_map(|channel| channel.tasks.values())
        .filter(|task| task.creator == *node_id && !task.status.is_terminal())
        .map(|task| task.reward as i64)
        .sum();
    node.balance_sp - frozen
}

/// Applies the one-shot effects of a task completion: treasury tax,
/// reputation credit on the task's tags, balance refold and validator-set
/// refresh. Must be called exactly once per completed task on each node;
/// the merge layer reports `newly_completed` for that purpose.
pub fn on_task_completed(state: &mut NetworkState, channel_id: &ChannelId, task_id: &TaskId, now: Timestamp) {
    let rate = state.config.transaction_tax_percentage;
    let Some(task) = state
        .channel(channel_id)
        .and_then(|channel| channel.tasks.get(task_id))
        .cloned()
    else {
        warn!(target: LOG_TARGET, "Completion effects for unknown task {} in {}", task_id, channel_id);
        return;
    };

    let tax = tax_for(task.reward, rate);
    state.channel_entry(channel_id).treasury_balance += tax;

    if let Some(assignee) = &task.assignee {
        if let Some(node) = state.nodes.get_mut(assignee) {
            reputation::credit_completion(&mut node.reputation, &task.tags, task.reward as f64, now);
            node.updated_at = now;
        }
    }

    recompute_balances(state);
    governance::recompute_validator_set(state);
    debug!(
        target: LOG_TARGET,
        "Task {} completed in {}: reward {}, tax {}", task_id, channel_id, task.reward, tax
    );
}
