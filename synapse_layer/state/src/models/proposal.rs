// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use synapse_common_types::{CommandId, NodeId, ProposalId, Timestamp};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    Generic,
    ConfigChange,
    NetworkOperation,
    CodeUpgrade,
    Command,
}

impl ProposalType {
    /// Whether an approved proposal of this type must be ratified by the
    /// validator set before it takes effect.
    pub fn requires_ratification(self) -> bool {
        matches!(
            self,
            ProposalType::NetworkOperation | ProposalType::CodeUpgrade | ProposalType::Command
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    ClosedApproved,
    ClosedRejected,
    PendingRatification,
    Ratified,
    Executed,
    Failed,
}

impl ProposalStatus {
    pub fn is_open(self) -> bool {
        matches!(self, ProposalStatus::Open)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
}

/// A single voter's ballot. Ballots merge per-voter with LWW on `timestamp`,
/// so a later vote from the same voter supersedes the earlier one.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub choice: VoteChoice,
    pub timestamp: Timestamp,
}

/// The deterministic tally computed at close time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub yes_weight: f64,
    pub no_weight: f64,
    pub approved: bool,
    pub closed_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub proposal_type: ProposalType,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Type-specific parameters: `{key, value}` for config changes, an
    /// operation body for network operations and commands.
    #[serde(default)]
    pub params: serde_json::Value,
    pub proposer: NodeId,
    pub created_at: Timestamp,
    pub closes_at: Timestamp,
    pub updated_at: Timestamp,
    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub votes: BTreeMap<NodeId, Ballot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ProposalOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
}

impl Proposal {
    /// Records or replaces a ballot. Ignored (returns false) once the
    /// proposal has left `open`; votes arriving after `closes_at` but before
    /// the close transition are still accepted.
    pub fn record_vote(&mut self, voter: NodeId, ballot: Ballot) -> bool {
        if !self.status.is_open() {
            return false;
        }
        match self.votes.get(&voter) {
            Some(existing) if existing.timestamp >= ballot.timestamp => false,
            _ => {
                self.votes.insert(voter, ballot);
                self.updated_at = ballot.timestamp;
                true
            },
        }
    }
}
