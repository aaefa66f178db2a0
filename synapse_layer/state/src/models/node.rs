// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use synapse_common_types::{serde_with, ChannelId, NodeId, Timestamp};

/// Per-tag specialization scores of a node.
///
/// `total` is always the sum of the tag values (invariant checked by tests to
/// a tolerance of 1e-6). Tags are created implicitly on first credit and
/// removed when decay pushes them below 0.1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    #[serde(rename = "_total")]
    pub total: f64,
    #[serde(rename = "_last_updated")]
    pub last_updated: Timestamp,
    pub tags: BTreeMap<String, f64>,
}

impl Reputation {
    pub fn new(now: Timestamp) -> Self {
        Self {
            total: 0.0,
            last_updated: now,
            tags: BTreeMap::new(),
        }
    }

    /// Migration shape for the legacy scalar reputation value.
    pub fn from_legacy_scalar(value: f64, now: Timestamp) -> Self {
        Self {
            total: value,
            last_updated: now,
            tags: BTreeMap::new(),
        }
    }

    pub fn recompute_total(&mut self) {
        self.total = self.tags.values().sum();
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    /// Raw ed25519 public key, needed to verify this node's gossip.
    #[serde(with = "serde_with::hex")]
    pub public_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Volatile: bumped locally whenever gossip from this node arrives.
    /// Excluded from replay comparisons.
    pub last_seen: Timestamp,
    pub reputation: Reputation,
    /// Derived from the completed-task fold; never mutated directly.
    pub balance_sp: i64,
    pub subscribed_channels: BTreeSet<ChannelId>,
    pub updated_at: Timestamp,
}

impl NodeRecord {
    pub fn new(id: NodeId, public_key: Vec<u8>, now: Timestamp) -> Self {
        let mut subscribed_channels = BTreeSet::new();
        subscribed_channels.insert(ChannelId::global());
        Self {
            id,
            public_key,
            url: None,
            last_seen: now,
            reputation: Reputation::new(now),
            balance_sp: 0,
            subscribed_channels,
            updated_at: now,
        }
    }
}
