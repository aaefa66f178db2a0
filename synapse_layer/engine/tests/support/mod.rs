// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Fixtures shared by the engine integration tests.

use std::time::Duration;

use serde_json::json;
use synapse_common_types::{ChannelId, NodeId, ProposalId, Timestamp};
use synapse_engine::{governance, reputation};
use synapse_state::models::{NetworkConfig, NetworkState, NodeRecord, VoteChoice};

pub fn t0() -> Timestamp {
    "2024-06-01T00:00:00Z".parse().unwrap()
}

pub fn after_voting_period() -> Timestamp {
    t0() + Duration::from_secs(86_400 + 60)
}

/// A network with `validators` reputed nodes (ids v1..vN) that form the
/// validator set, plus a plain `proposer` node.
pub fn network_with_validators(validators: usize) -> NetworkState {
    let mut state = NetworkState::bootstrap(NetworkConfig::default());
    for i in 1..=validators {
        let id = NodeId::new(format!("v{}", i));
        let mut node = NodeRecord::new(id.clone(), vec![0; 32], t0());
        reputation::credit_completion(&mut node.reputation, &["general".to_string()], 100.0, t0());
        state.nodes.insert(id, node);
    }
    let proposer = NodeId::new("proposer");
    state
        .nodes
        .insert(proposer.clone(), NodeRecord::new(proposer, vec![0; 32], t0()));
    synapse_engine::economy::recompute_balances(&mut state);
    governance::recompute_validator_set(&mut state);
    state
}

/// Drives a network-operation proposal through vote, close and full
/// ratification, returning its id. The command lands in the execution log;
/// the caller decides when to dispatch.
pub fn ratify_operation(state: &mut NetworkState, params: serde_json::Value) -> ProposalId {
    let proposal = governance::create_proposal(
        state,
        &ChannelId::global(),
        NodeId::new("proposer"),
        &json!({
            "title": "operation",
            "proposal_type": "network_operation",
            "tags": [],
            "params": params,
        }),
        t0(),
    )
    .unwrap();
    governance::submit_vote(state, &proposal.id, NodeId::new("v1"), VoteChoice::Yes, t0()).unwrap();
    governance::close_proposal(state, &proposal.id, after_voting_period()).unwrap();

    let validators = state.validator_set.clone();
    let threshold = governance::majority_threshold(validators.len());
    for validator in validators.into_iter().take(threshold) {
        governance::record_ratification(state, &proposal.id, validator, after_voting_period()).unwrap();
    }
    proposal.id
}
