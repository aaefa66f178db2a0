// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use synapse_common_types::{NodeId, TaskId, Timestamp, ToolId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    AuctionOpen,
    Claimed,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

/// A bid on an auctioned task. Bids merge per-bidder with LWW on
/// `submitted_at`, independent of the containing task's `updated_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: NodeId,
    /// The reward the bidder is willing to accept.
    pub amount_sp: u64,
    /// Self-declared delivery estimate, used by the speed term of the
    /// winner-selection score.
    pub estimated_days: u32,
    pub submitted_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Auction {
    pub opened_at: Timestamp,
    pub deadline: Timestamp,
    /// Upper bound for acceptable bids; the task reward when the auction was
    /// opened.
    pub max_reward: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub schema_name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: TaskStatus,
    pub creator: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<NodeId>,
    pub reward: u64,
    #[serde(default)]
    pub required_tools: Vec<ToolId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction: Option<Auction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bids: BTreeMap<NodeId, Bid>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl Task {
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}
