// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use synapse_common_types::{ChannelId, NodeId, ProposalId, Timestamp};

use super::{
    channel::ChannelState,
    command::ExecutedCommand,
    config::NetworkConfig,
    node::NodeRecord,
    proposal::Proposal,
};
use crate::schema::{self, SchemaDefinition};

/// Coefficients of the contextual vote weight formula:
///
/// `weight = base_offset + base_scale·log2(total + 1) + bonus_scale·log2(specialization + 1)`
///
/// Mutable only through the ratified `update_reputation_formula` command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationFormula {
    pub base_offset: f64,
    pub base_scale: f64,
    pub bonus_scale: f64,
}

impl Default for ReputationFormula {
    fn default() -> Self {
        Self {
            base_offset: 1.0,
            base_scale: 1.0,
            bonus_scale: 1.0,
        }
    }
}

/// The whole replicated state of one network as seen by one node. Everything
/// in here is JSON-serializable and snapshotted atomically after every
/// mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub nodes: BTreeMap<NodeId, NodeRecord>,
    pub config: NetworkConfig,
    pub schemas: BTreeMap<String, SchemaDefinition>,
    /// Top-N nodes by total reputation, deterministic with lexicographic
    /// tie-break. Recomputed whenever reputations change.
    pub validator_set: Vec<NodeId>,
    /// Append-only; the only point of cross-node total ordering.
    pub execution_log: Vec<ExecutedCommand>,
    /// Index of the last log entry this node has executed, -1 before any.
    pub last_executed_command_index: i64,
    /// Validator approvals per pending proposal.
    pub ratification_votes: BTreeMap<ProposalId, BTreeSet<NodeId>>,
    #[serde(default)]
    pub reputation_formula: ReputationFormula,
    pub channels: BTreeMap<ChannelId, ChannelState>,
}

impl NetworkState {
    /// Fresh state for a new network: the distinguished `global` channel,
    /// the built-in schemas, and the supplied config defaults.
    pub fn bootstrap(config: NetworkConfig) -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(ChannelId::global(), ChannelState::default());
        Self {
            nodes: BTreeMap::new(),
            config,
            schemas: schema::builtin_schemas(),
            validator_set: Vec::new(),
            execution_log: Vec::new(),
            last_executed_command_index: -1,
            ratification_votes: BTreeMap::new(),
            reputation_formula: ReputationFormula::default(),
            channels,
        }
    }

    pub fn channel(&self, id: &ChannelId) -> Option<&ChannelState> {
        self.channels.get(id)
    }

    pub fn channel_mut(&mut self, id: &ChannelId) -> Option<&mut ChannelState> {
        self.channels.get_mut(id)
    }

    /// Channel access that creates the channel on first touch. Channels come
    /// into being by being referenced; there is no explicit create step.
    pub fn channel_entry(&mut self, id: &ChannelId) -> &mut ChannelState {
        self.channels.entry(id.clone()).or_default()
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id)
    }

    /// Registers the local node on first boot; no-op when already present.
    pub fn ensure_node(&mut self, id: &NodeId, public_key: Vec<u8>, now: Timestamp) -> &mut NodeRecord {
        self.nodes
            .entry(id.clone())
            .or_insert_with(|| NodeRecord::new(id.clone(), public_key, now))
    }

    /// Looks up a proposal across all channels. Proposal ids are globally
    /// unique (random at creation), so the first hit is the only hit.
    pub fn find_proposal(&self, id: &ProposalId) -> Option<(&ChannelId, &Proposal)> {
        self.channels
            .iter()
            .find_map(|(channel, state)| state.proposals.get(id).map(|p| (channel, p)))
    }

    pub fn find_proposal_mut(&mut self, id: &ProposalId) -> Option<(ChannelId, &mut Proposal)> {
        self.channels
            .iter_mut()
            .find_map(|(channel, state)| state.proposals.get_mut(id).map(|p| (channel.clone(), p)))
    }
}
