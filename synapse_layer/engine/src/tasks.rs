// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Task lifecycle operations as performed at the local API boundary. The
//! resulting task objects are gossiped and remote nodes converge through
//! the merge layer.

use log::*;
use serde_json::Value;
use synapse_common_types::{optional::IsNotFoundError, ChannelId, NodeId, TaskId, Timestamp, ToolId};
use synapse_state::models::{Auction, Bid, NetworkState, Task, TaskStatus};

use crate::economy;

const LOG_TARGET: &str = "synapse::engine::tasks";

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task not found: {id}")]
    NotFound { id: TaskId },
    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },
    #[error("Insufficient funds: balance {available} SP, required {required} SP")]
    InsufficientFunds { available: i64, required: i64 },
    #[error("Task is {status:?}, operation requires {expected}")]
    InvalidStatus { status: TaskStatus, expected: &'static str },
    #[error("Invalid task body: {reason}")]
    InvalidBody { reason: String },
}

impl IsNotFoundError for TaskError {
    fn is_not_found_error(&self) -> bool {
        matches!(self, TaskError::NotFound { .. })
    }
}

fn forbidden<T: Into<String>>(reason: T) -> TaskError {
    TaskError::Forbidden { reason: reason.into() }
}

/// Builds a task from a schema-validated `task_v1`/`task_v2` body. The
/// reward must be covered by the creator's available balance; that reward
/// stays frozen until the task reaches a terminal status.
pub fn create_task(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    creator: NodeId,
    schema_name: &str,
    validated_body: &Value,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let title = validated_body
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::InvalidBody {
            reason: "missing title".to_string(),
        })?
        .to_string();
    let reward = validated_body
        .get("reward")
        .and_then(Value::as_u64)
        .ok_or_else(|| TaskError::InvalidBody {
            reason: "missing reward".to_string(),
        })?;

    let available = economy::available_balance(state, &creator);
    if available < reward as i64 {
        return Err(TaskError::InsufficientFunds {
            available,
            required: reward as i64,
        });
    }

    let string_list = |field: &str| {
        validated_body
            .get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    };

    let task = Task {
        id: TaskId::random(),
        schema_name: schema_name.to_string(),
        title,
        description: validated_body
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        tags: string_list("tags"),
        status: TaskStatus::Open,
        creator,
        assignee: None,
        reward,
        required_tools: string_list("required_tools").into_iter().map(ToolId::new).collect(),
        auction: None,
        bids: Default::default(),
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    state
        .channel_entry(channel_id)
        .tasks
        .insert(task.id.clone(), task.clone());
    info!(target: LOG_TARGET, "Task {} created in {} (reward {})", task.id, channel_id, task.reward);
    Ok(task)
}

fn task_mut<'a>(
    state: &'a mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
) -> Result<&'a mut Task, TaskError> {
    state
        .channel_mut(channel_id)
        .and_then(|channel| channel.tasks.get_mut(task_id))
        .ok_or_else(|| TaskError::NotFound { id: task_id.clone() })
}

pub fn claim_task(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
    claimant: NodeId,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let task = task_mut(state, channel_id, task_id)?;
    if task.status != TaskStatus::Open {
        return Err(TaskError::InvalidStatus {
            status: task.status,
            expected: "open",
        });
    }
    task.assignee = Some(claimant);
    task.status = TaskStatus::Claimed;
    task.touch(now);
    Ok(task.clone())
}

pub fn progress_task(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
    caller: &NodeId,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let task = task_mut(state, channel_id, task_id)?;
    if task.assignee.as_ref() != Some(caller) {
        return Err(forbidden("only the assignee may start progress"));
    }
    if task.status != TaskStatus::Claimed {
        return Err(TaskError::InvalidStatus {
            status: task.status,
            expected: "claimed",
        });
    }
    task.status = TaskStatus::InProgress;
    task.touch(now);
    Ok(task.clone())
}

/// Completion also applies the one-shot economic and reputational effects
/// on this node; remote nodes apply them when the merge reports the
/// transition.
pub fn complete_task(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
    caller: &NodeId,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let task = task_mut(state, channel_id, task_id)?;
    if task.assignee.as_ref() != Some(caller) {
        return Err(forbidden("only the assignee may complete"));
    }
    if !matches!(task.status, TaskStatus::Claimed | TaskStatus::InProgress) {
        return Err(TaskError::InvalidStatus {
            status: task.status,
            expected: "claimed or in_progress",
        });
    }
    task.status = TaskStatus::Completed;
    task.completed_at = Some(now);
    task.touch(now);
    let completed = task.clone();

    economy::on_task_completed(state, channel_id, task_id, now);
    Ok(completed)
}

/// A creator may retract a task that nobody is working on yet. The task is
/// kept as `cancelled` so the tombstone gossips and wins over stale copies.
pub fn delete_task(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
    caller: &NodeId,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let task = task_mut(state, channel_id, task_id)?;
    if task.creator != *caller {
        return Err(forbidden("only the creator may delete"));
    }
    if !matches!(task.status, TaskStatus::Open | TaskStatus::AuctionOpen) {
        return Err(TaskError::InvalidStatus {
            status: task.status,
            expected: "open or auction_open",
        });
    }
    task.status = TaskStatus::Cancelled;
    task.touch(now);
    Ok(task.clone())
}

pub fn start_auction(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
    caller: &NodeId,
    duration: std::time::Duration,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let task = task_mut(state, channel_id, task_id)?;
    if task.creator != *caller {
        return Err(forbidden("only the creator may open an auction"));
    }
    if task.status != TaskStatus::Open {
        return Err(TaskError::InvalidStatus {
            status: task.status,
            expected: "open",
        });
    }
    task.auction = Some(Auction {
        opened_at: now,
        deadline: now + duration,
        max_reward: task.reward,
    });
    task.status = TaskStatus::AuctionOpen;
    task.touch(now);
    Ok(task.clone())
}

pub fn place_bid(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
    bidder: NodeId,
    amount_sp: u64,
    estimated_days: u32,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let task = task_mut(state, channel_id, task_id)?;
    if task.status != TaskStatus::AuctionOpen {
        return Err(TaskError::InvalidStatus {
            status: task.status,
            expected: "auction_open",
        });
    }
    let auction = task.auction.as_ref().expect("auction_open task always carries an auction");
    if amount_sp > auction.max_reward {
        return Err(forbidden(format!(
            "bid {} exceeds the maximum reward {}",
            amount_sp, auction.max_reward
        )));
    }
    task.bids.insert(bidder.clone(), Bid {
        bidder,
        amount_sp,
        estimated_days,
        submitted_at: now,
    });
    task.touch(now);
    Ok(task.clone())
}

/// Deterministic winner selection once an auction deadline has passed:
/// `score = 0.4·cost + 0.4·reputation + 0.2·speed`, every term normalized to
/// [0, 1] across the bid set, ties broken by lexicographic bidder id. Any
/// node that runs this over the same bids picks the same winner. With no
/// bids the task falls back to `open`.
pub fn finalize_auction(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    task_id: &TaskId,
    now: Timestamp,
) -> Result<Task, TaskError> {
    let snapshot = state
        .channel(channel_id)
        .and_then(|channel| channel.tasks.get(task_id))
        .cloned()
        .ok_or_else(|| TaskError::NotFound { id: task_id.clone() })?;
    if snapshot.status != TaskStatus::AuctionOpen {
        return Err(TaskError::InvalidStatus {
            status: snapshot.status,
            expected: "auction_open",
        });
    }
    let auction = snapshot.auction.as_ref().expect("auction_open task always carries an auction");
    if now < auction.deadline {
        return Err(forbidden("auction deadline has not passed"));
    }

    let winner = select_winner(state, &snapshot);
    let task = task_mut(state, channel_id, task_id)?;
    match winner {
        Some((bidder, amount)) => {
            info!(target: LOG_TARGET, "Auction for {} won by {} at {} SP", task_id, bidder, amount);
            task.assignee = Some(bidder);
            task.reward = amount;
            task.status = TaskStatus::Claimed;
        },
        None => {
            debug!(target: LOG_TARGET, "Auction for {} expired without bids", task_id);
            task.auction = None;
            task.status = TaskStatus::Open;
        },
    }
    task.touch(now);
    Ok(task.clone())
}

fn select_winner(state: &NetworkState, task: &Task) -> Option<(NodeId, u64)> {
    if task.bids.is_empty() {
        return None;
    }
    let max_cost = task.bids.values().map(|b| b.amount_sp).max().unwrap_or(0).max(1) as f64;
    let max_days = task.bids.values().map(|b| b.estimated_days).max().unwrap_or(0).max(1) as f64;
    let max_reputation = task
        .bids
        .keys()
        .map(|bidder| state.node(bidder).map(|n| n.reputation.total).unwrap_or(0.0))
        .fold(0.0_f64, f64::max)
        .max(1.0);

    // BTreeMap iteration is ordered by bidder id, and strict greater-than
    // keeps the first (lexicographically smallest) on equal scores
    let mut best: Option<(f64, &NodeId, u64)> = None;
    for (bidder, bid) in &task.bids {
        let cost_score = 1.0 - bid.amount_sp as f64 / max_cost;
        let reputation_score = state.node(bidder).map(|n| n.reputation.total).unwrap_or(0.0) / max_reputation;
        let speed_score = 1.0 - bid.estimated_days as f64 / max_days;
        let score = 0.4 * cost_score + 0.4 * reputation_score + 0.2 * speed_score;
        if best.map_or(true, |(best_score, _, _)| score > best_score) {
            best = Some((score, bidder, bid.amount_sp));
        }
    }
    best.map(|(_, bidder, amount)| (bidder.clone(), amount))
}
