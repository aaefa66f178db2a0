// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Proposal lifecycle: creation, reputation-weighted voting, deterministic
//! closing, and validator ratification feeding the command log.
//!
//! Closing is a pure function of the proposal's vote map and the voters'
//! reputations, so any node can trigger it and all nodes converge on the
//! same outcome. Ratification majorities are measured against the current
//! validator set at tally time.

use log::*;
use serde_json::Value;
use synapse_common_types::{optional::IsNotFoundError, ChannelId, NodeId, ProposalId, Timestamp};
use synapse_state::models::{
    derive_command_id,
    ExecutedCommand,
    NetworkState,
    Operation,
    Proposal,
    ProposalOutcome,
    ProposalStatus,
    ProposalType,
    Reputation,
    VoteChoice,
};

use crate::reputation::contextual_weight;

const LOG_TARGET: &str = "synapse::engine::governance";

#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("Proposal not found: {id}")]
    ProposalNotFound { id: ProposalId },
    #[error("Voting is still open until {closes_at}")]
    VotingStillOpen { closes_at: Timestamp },
    #[error("Proposal is no longer open for voting")]
    NotOpen,
    #[error("Proposal is not awaiting ratification")]
    NotPendingRatification,
    #[error("Node {node} is not in the current validator set")]
    NotValidator { node: NodeId },
    #[error("Proposal params do not describe a valid operation: {reason}")]
    InvalidOperation { reason: String },
    #[error("Invalid proposal body: {reason}")]
    InvalidBody { reason: String },
}

impl IsNotFoundError for GovernanceError {
    fn is_not_found_error(&self) -> bool {
        matches!(self, GovernanceError::ProposalNotFound { .. })
    }
}

/// Builds a proposal from a schema-validated `proposal_v1` body and records
/// it in the channel. `closes_at` defaults to now + the configured voting
/// period.
pub fn create_proposal(
    state: &mut NetworkState,
    channel_id: &ChannelId,
    proposer: NodeId,
    validated_body: &Value,
    now: Timestamp,
) -> Result<Proposal, GovernanceError> {
    let title = validated_body
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| GovernanceError::InvalidBody {
            reason: "missing title".to_string(),
        })?
        .to_string();
    let description = validated_body
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let proposal_type: ProposalType = validated_body
        .get("proposal_type")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| GovernanceError::InvalidBody { reason: e.to_string() })?
        .unwrap_or(ProposalType::Generic);
    let tags = validated_body
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let params = validated_body.get("params").cloned().unwrap_or(Value::Null);

    let voting_period = std::time::Duration::from_secs(state.config.proposal_voting_period_seconds);
    let proposal = Proposal {
        id: ProposalId::random(),
        title,
        description,
        proposal_type,
        tags,
        params,
        proposer,
        created_at: now,
        closes_at: now + voting_period,
        updated_at: now,
        status: ProposalStatus::Open,
        votes: Default::default(),
        outcome: None,
        command_id: None,
    };
    state
        .channel_entry(channel_id)
        .proposals
        .insert(proposal.id.clone(), proposal.clone());
    info!(target: LOG_TARGET, "📜 Proposal {} created in {}", proposal.id, channel_id);
    Ok(proposal)
}

/// Records or updates a vote. Permissive cutoff: accepted while the
/// proposal is still `open`, even past `closes_at`.
pub fn submit_vote(
    state: &mut NetworkState,
    proposal_id: &ProposalId,
    voter: NodeId,
    choice: VoteChoice,
    now: Timestamp,
) -> Result<(), GovernanceError> {
    let (_, proposal) = state
        .find_proposal_mut(proposal_id)
        .ok_or_else(|| GovernanceError::ProposalNotFound { id: proposal_id.clone() })?;
    if !proposal.status.is_open() {
        return Err(GovernanceError::NotOpen);
    }
    proposal.record_vote(voter, synapse_state::models::Ballot { choice, timestamp: now });
    Ok(())
}

/// Closes a proposal past its deadline and applies the type-specific next
/// state. Closing an already-closed proposal returns the recorded outcome
/// unchanged.
pub fn close_proposal(
    state: &mut NetworkState,
    proposal_id: &ProposalId,
    now: Timestamp,
) -> Result<ProposalOutcome, GovernanceError> {
    let (channel_id, snapshot) = state
        .find_proposal(proposal_id)
        .map(|(channel, proposal)| (channel.clone(), proposal.clone()))
        .ok_or_else(|| GovernanceError::ProposalNotFound { id: proposal_id.clone() })?;

    if !snapshot.status.is_open() {
        return snapshot.outcome.clone().ok_or(GovernanceError::NotOpen);
    }
    if now < snapshot.closes_at {
        return Err(GovernanceError::VotingStillOpen {
            closes_at: snapshot.closes_at,
        });
    }

    let formula = state.reputation_formula.clone();
    let ratio = state.config.approval_ratio;
    let mut yes_weight = 0.0;
    let mut no_weight = 0.0;
    for (voter, ballot) in &snapshot.votes {
        let reputation = state
            .node(voter)
            .map(|node| node.reputation.clone())
            .unwrap_or_else(|| Reputation::new(now));
        let weight = contextual_weight(&formula, &reputation, &snapshot.tags);
        match ballot.choice {
            VoteChoice::Yes => yes_weight += weight,
            VoteChoice::No => no_weight += weight,
        }
    }
    let approved = yes_weight > no_weight * ratio;
    let outcome = ProposalOutcome {
        yes_weight,
        no_weight,
        approved,
        closed_at: now,
    };

    let next_status = if !approved {
        ProposalStatus::ClosedRejected
    } else {
        match snapshot.proposal_type {
            ProposalType::Generic => ProposalStatus::ClosedApproved,
            ProposalType::ConfigChange => apply_config_change(state, &snapshot),
            ProposalType::NetworkOperation | ProposalType::Command | ProposalType::CodeUpgrade => {
                // Unparseable params fail here rather than poisoning the log
                match operation_from_proposal(&snapshot) {
                    Ok(_) => ProposalStatus::PendingRatification,
                    Err(e) => {
                        warn!(target: LOG_TARGET, "Proposal {} approved but invalid: {}", snapshot.id, e);
                        ProposalStatus::Failed
                    },
                }
            },
        }
    };

    let channel = state.channel_entry(&channel_id);
    if let Some(proposal) = channel.proposals.get_mut(proposal_id) {
        proposal.status = next_status;
        proposal.outcome = Some(outcome.clone());
        proposal.updated_at = now;
    }
    info!(
        target: LOG_TARGET,
        "🗳️ Proposal {} closed: yes {:.3}, no {:.3} → {:?}", proposal_id, yes_weight, no_weight, next_status
    );
    Ok(outcome)
}

fn apply_config_change(state: &mut NetworkState, proposal: &Proposal) -> ProposalStatus {
    let key = proposal.params.get("key").and_then(Value::as_str);
    let value = proposal.params.get("value");
    match (key, value) {
        (Some(key), Some(value)) => match state.config.set(key, value) {
            Ok(()) => {
                info!(target: LOG_TARGET, "Config change applied: {} = {}", key, value);
                ProposalStatus::Executed
            },
            Err(e) => {
                warn!(target: LOG_TARGET, "Config change rejected: {}", e);
                ProposalStatus::Failed
            },
        },
        _ => {
            warn!(target: LOG_TARGET, "Config change proposal {} missing key/value", proposal.id);
            ProposalStatus::Failed
        },
    }
}

/// The operation a ratified proposal contributes to the command log.
pub fn operation_from_proposal(proposal: &Proposal) -> Result<Operation, GovernanceError> {
    match proposal.proposal_type {
        ProposalType::NetworkOperation | ProposalType::Command => {
            serde_json::from_value(proposal.params.clone())
                .map_err(|e| GovernanceError::InvalidOperation { reason: e.to_string() })
        },
        ProposalType::CodeUpgrade => {
            if proposal.params.get("op").is_some() {
                return serde_json::from_value(proposal.params.clone())
                    .map_err(|e| GovernanceError::InvalidOperation { reason: e.to_string() });
            }
            let get = |field: &str| {
                proposal
                    .params
                    .get(field)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| GovernanceError::InvalidOperation {
                        reason: format!("missing {}", field),
                    })
            };
            Ok(Operation::CodeUpgrade {
                package_hash: get("package_hash")?,
                version: get("version")?,
                url: get("url")?,
            })
        },
        _ => Err(GovernanceError::InvalidOperation {
            reason: "proposal type does not produce a command".to_string(),
        }),
    }
}

/// Strict majority of the current validator set.
pub fn majority_threshold(validator_count: usize) -> usize {
    validator_count / 2 + 1
}

/// Top-N nodes by total reputation, lexicographic node id as the tie-break.
pub fn recompute_validator_set(state: &mut NetworkState) {
    let mut ranked: Vec<(&NodeId, f64)> = state
        .nodes
        .values()
        .map(|node| (&node.id, node.reputation.total))
        .collect();
    ranked.sort_by(|(id_a, total_a), (id_b, total_b)| {
        total_b
            .partial_cmp(total_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| id_a.cmp(id_b))
    });
    state.validator_set = ranked
        .into_iter()
        .take(state.config.validator_set_size)
        .map(|(id, _)| id.clone())
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatificationStatus {
    Pending { approvals: usize, threshold: usize },
    Ratified { command_id: synapse_common_types::CommandId },
}

/// Records a validator's approval. Once a strict majority of the current
/// validator set has approved, the proposal becomes `ratified` and its
/// command is appended to the execution log with a deterministic id.
///
/// `ratified_at` is taken from the proposal's `closes_at` so that command
/// handlers reading "now" from it replay identically on every node.
pub fn record_ratification(
    state: &mut NetworkState,
    proposal_id: &ProposalId,
    validator: NodeId,
    now: Timestamp,
) -> Result<RatificationStatus, GovernanceError> {
    let (_, snapshot) = state
        .find_proposal(proposal_id)
        .map(|(channel, proposal)| (channel.clone(), proposal.clone()))
        .ok_or_else(|| GovernanceError::ProposalNotFound { id: proposal_id.clone() })?;

    match snapshot.status {
        ProposalStatus::PendingRatification => {},
        ProposalStatus::Ratified | ProposalStatus::Executed => {
            let command_id = snapshot.command_id.ok_or(GovernanceError::NotPendingRatification)?;
            return Ok(RatificationStatus::Ratified { command_id });
        },
        _ => return Err(GovernanceError::NotPendingRatification),
    }

    if !state.validator_set.contains(&validator) {
        return Err(GovernanceError::NotValidator { node: validator });
    }

    let approvals = state.ratification_votes.entry(proposal_id.clone()).or_default();
    approvals.insert(validator);
    let validator_set = state.validator_set.clone();
    let count = approvals.iter().filter(|node| validator_set.contains(node)).count();
    let threshold = majority_threshold(validator_set.len());
    if count < threshold {
        debug!(
            target: LOG_TARGET,
            "Proposal {} ratification at {}/{}", proposal_id, count, threshold
        );
        return Ok(RatificationStatus::Pending {
            approvals: count,
            threshold,
        });
    }

    let operation = operation_from_proposal(&snapshot)?;
    let command_id = derive_command_id(proposal_id, &validator_set);
    state.execution_log.push(ExecutedCommand {
        command_id: command_id.clone(),
        proposal_id: proposal_id.clone(),
        operation,
        ratified_at: snapshot.closes_at,
        ratified_by: validator_set,
        executed_at: None,
        result: None,
    });
    if let Some((_, proposal)) = state.find_proposal_mut(proposal_id) {
        proposal.status = ProposalStatus::Ratified;
        proposal.command_id = Some(command_id.clone());
        proposal.updated_at = now;
    }
    info!(target: LOG_TARGET, "✅ Proposal {} ratified as command {}", proposal_id, command_id);
    Ok(RatificationStatus::Ratified { command_id })
}
