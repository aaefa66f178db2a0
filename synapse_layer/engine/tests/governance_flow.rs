// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! End-to-end governance scenarios: proposal → weighted vote → close →
//! validator ratification → command dispatch, including the failure paths
//! that must leave state untouched.

mod support;

use serde_json::json;
use support::{after_voting_period, network_with_validators, ratify_operation, t0};
use synapse_common_types::{ChannelId, ToolId};
use synapse_engine::{commands, governance, tools};
use synapse_state::models::{ProposalStatus, ToolStatus};

// Treasury 50, ratified acquisition costing 100: the command is recorded as
// failed with "insufficient_funds", no tool appears, treasury is unchanged.
#[test]
fn underfunded_acquisition_fails_without_side_effects() {
    let mut state = network_with_validators(3);
    state.channel_entry(&ChannelId::global()).treasury_balance = 50;

    let proposal_id = ratify_operation(&mut state, json!({
        "op": "acquire_common_tool",
        "channel": "global",
        "tool_id": "expensive",
        "type": "api_key",
        "description": "",
        "monthly_cost_sp": 100,
        "credentials_to_encrypt": "sk_nope",
    }));
    assert_eq!(commands::run_pending(&mut state, after_voting_period()), 1);

    let entry = state.execution_log.last().unwrap();
    let result = entry.result.as_ref().unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("insufficient_funds"));

    let channel = state.channel(&ChannelId::global()).unwrap();
    assert!(channel.common_tools.is_empty());
    assert_eq!(channel.treasury_balance, 50);

    let (_, proposal) = state.find_proposal(&proposal_id).unwrap();
    assert_eq!(proposal.status, ProposalStatus::Failed);
}

// Treasury 150, tool costs 50 with credentials "sk_abc123": tool active,
// ciphertext non-empty and different from the plaintext, treasury 100.
#[test]
fn funded_acquisition_creates_active_tool() {
    let mut state = network_with_validators(3);
    state.channel_entry(&ChannelId::global()).treasury_balance = 150;

    let proposal_id = ratify_operation(&mut state, json!({
        "op": "acquire_common_tool",
        "channel": "global",
        "tool_id": "stripe",
        "type": "api_key",
        "description": "payments",
        "monthly_cost_sp": 50,
        "credentials_to_encrypt": "sk_abc123",
    }));
    commands::run_pending(&mut state, after_voting_period());

    let channel = state.channel(&ChannelId::global()).unwrap();
    assert_eq!(channel.treasury_balance, 100);
    let tool = &channel.common_tools[&ToolId::new("stripe")];
    assert_eq!(tool.status, ToolStatus::Active);
    assert!(!tool.encrypted_credentials.is_empty());
    assert_ne!(tool.encrypted_credentials, b"sk_abc123".to_vec());

    let (_, proposal) = state.find_proposal(&proposal_id).unwrap();
    assert_eq!(proposal.status, ProposalStatus::Executed);
    assert_eq!(proposal.command_id.as_ref(), Some(&state.execution_log[0].command_id));
}

// An active tool deprecated by ratified command stays in state for audit
// and is skipped by the next billing tick.
#[test]
fn deprecation_stops_billing_but_keeps_the_tool() {
    let mut state = network_with_validators(3);
    state.channel_entry(&ChannelId::global()).treasury_balance = 150;

    ratify_operation(&mut state, json!({
        "op": "acquire_common_tool",
        "channel": "global",
        "tool_id": "stripe",
        "type": "api_key",
        "description": "",
        "monthly_cost_sp": 50,
        "credentials_to_encrypt": "sk_abc123",
    }));
    commands::run_pending(&mut state, after_voting_period());

    ratify_operation(&mut state, json!({
        "op": "deprecate_common_tool",
        "channel": "global",
        "tool_id": "stripe",
    }));
    commands::run_pending(&mut state, after_voting_period());

    let channel = state.channel(&ChannelId::global()).unwrap();
    let tool = &channel.common_tools[&ToolId::new("stripe")];
    assert_eq!(tool.status, ToolStatus::Deprecated);
    let treasury_before = channel.treasury_balance;

    let report = tools::run_billing_cycle(&mut state, t0() + std::time::Duration::from_secs(90 * 86_400));
    assert_eq!(report.paid, 0);
    assert_eq!(
        state.channel(&ChannelId::global()).unwrap().treasury_balance,
        treasury_before
    );
    assert!(state
        .channel(&ChannelId::global())
        .unwrap()
        .common_tools
        .contains_key(&ToolId::new("stripe")));
}

// The execution log keeps both outcomes and the index covers the full log
// even when a command in the middle fails.
#[test]
fn log_liveness_across_failures() {
    let mut state = network_with_validators(3);
    state.channel_entry(&ChannelId::global()).treasury_balance = 10;

    ratify_operation(&mut state, json!({
        "op": "acquire_common_tool",
        "channel": "global",
        "tool_id": "too_dear",
        "type": "api_key",
        "description": "",
        "monthly_cost_sp": 100,
        "credentials_to_encrypt": "x",
    }));
    ratify_operation(&mut state, json!({
        "op": "acquire_common_tool",
        "channel": "global",
        "tool_id": "affordable",
        "type": "webhook",
        "description": "",
        "monthly_cost_sp": 5,
        "credentials_to_encrypt": "https://hooks.example.com/a",
    }));

    assert_eq!(commands::run_pending(&mut state, after_voting_period()), 2);
    assert_eq!(state.last_executed_command_index, 1);
    assert!(!state.execution_log[0].result.as_ref().unwrap().success);
    assert!(state.execution_log[1].result.as_ref().unwrap().success);
    assert!(state
        .channel(&ChannelId::global())
        .unwrap()
        .common_tools
        .contains_key(&ToolId::new("affordable")));
}

// Ratification by fewer than a strict majority leaves the proposal pending
// and the log untouched.
#[test]
fn minority_ratification_does_not_produce_a_command() {
    let mut state = network_with_validators(5);
    let proposal = governance::create_proposal(
        &mut state,
        &ChannelId::global(),
        synapse_common_types::NodeId::new("proposer"),
        &json!({
            "title": "operation",
            "proposal_type": "network_operation",
            "params": {"op": "deprecate_common_tool", "channel": "global", "tool_id": "x"},
        }),
        t0(),
    )
    .unwrap();
    governance::submit_vote(
        &mut state,
        &proposal.id,
        synapse_common_types::NodeId::new("v1"),
        synapse_state::models::VoteChoice::Yes,
        t0(),
    )
    .unwrap();
    governance::close_proposal(&mut state, &proposal.id, after_voting_period()).unwrap();

    for validator in ["v1", "v2"] {
        governance::record_ratification(
            &mut state,
            &proposal.id,
            synapse_common_types::NodeId::new(validator),
            after_voting_period(),
        )
        .unwrap();
    }
    assert!(state.execution_log.is_empty());
    let (_, stored) = state.find_proposal(&proposal.id).unwrap();
    assert_eq!(stored.status, ProposalStatus::PendingRatification);
}
