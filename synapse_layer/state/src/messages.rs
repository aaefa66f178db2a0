// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! The signed envelope every gossiped object rides in, plus topic naming
//! and the content-hash dedup cache the transport contract requires.

use std::{collections::HashMap, time::Duration};

use blake2::Blake2b;
use digest::{consts::U32, Digest};
use serde::{Deserialize, Serialize};
use synapse_common_types::{serde_with, ChannelId, NodeId, ProposalId, Timestamp};
use synapse_crypto::{identity, SynapseKeypair};

use crate::{
    models::{CommonTool, ExecutedCommand, NodeRecord, Proposal, Task},
    schema::SchemaDefinition,
};

type Blake2b256 = Blake2b<U32>;

/// Topic names used with the transport's pub/sub interface. Channel-scoped
/// objects travel on the channel topic; node records, ratifications and the
/// execution log travel on the network topic every node subscribes to.
pub mod topics {
    use synapse_common_types::ChannelId;

    pub const NETWORK: &str = "synapse/network";

    pub fn for_channel(channel: &ChannelId) -> String {
        format!("synapse/channel/{}", channel)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GossipPayload {
    Task {
        channel: ChannelId,
        task: Task,
    },
    Proposal {
        channel: ChannelId,
        proposal: Proposal,
    },
    NodeRecord {
        node: NodeRecord,
    },
    CommonTool {
        channel: ChannelId,
        tool: CommonTool,
    },
    /// A validator's signed approval of a pending proposal. The signature is
    /// the envelope's; the engine additionally checks the sender is in the
    /// current validator set.
    RatificationApproval {
        channel: ChannelId,
        proposal_id: ProposalId,
    },
    ExecutionLog {
        entries: Vec<ExecutedCommand>,
    },
    Schema {
        name: String,
        definition: SchemaDefinition,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Failed to encode gossip payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode gossip payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Envelope signature verification failed")]
    BadSignature,
    #[error("Envelope sender does not match the public key fingerprint")]
    SenderMismatch,
}

/// A signed, self-authenticating gossip frame. The signature covers the
/// sender id, the send timestamp and the exact payload bytes, so any
/// tampering in transit fails verification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub sender: NodeId,
    #[serde(with = "serde_with::hex")]
    pub public_key: Vec<u8>,
    pub sent_at: Timestamp,
    pub payload: serde_json::Value,
    #[serde(with = "serde_with::hex")]
    pub signature: Vec<u8>,
}

impl SignedEnvelope {
    pub fn seal(keypair: &SynapseKeypair, payload: &GossipPayload) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_value(payload).map_err(EnvelopeError::Encode)?;
        let sent_at = Timestamp::now();
        let message = signing_bytes(keypair.node_id(), sent_at, &payload)?;
        let signature = keypair.sign(&message).to_bytes().to_vec();
        Ok(Self {
            sender: keypair.node_id().clone(),
            public_key: keypair.public_key_bytes().to_vec(),
            sent_at,
            payload,
            signature,
        })
    }

    /// Verifies sender binding and signature, then decodes the payload.
    /// Failing envelopes are dropped by the caller before schema validation.
    pub fn verify_and_open(&self) -> Result<GossipPayload, EnvelopeError> {
        match identity::fingerprint_bytes(&self.public_key) {
            Some(fingerprint) if fingerprint == self.sender => {},
            Some(_) => return Err(EnvelopeError::SenderMismatch),
            None => return Err(EnvelopeError::BadSignature),
        }
        let message = signing_bytes(&self.sender, self.sent_at, &self.payload)?;
        if !identity::verify(&self.public_key, &message, &self.signature) {
            return Err(EnvelopeError::BadSignature);
        }
        serde_json::from_value(self.payload.clone()).map_err(EnvelopeError::Decode)
    }

    /// Stable content hash for transport-level dedup.
    pub fn content_hash(&self) -> String {
        let mut hasher = Blake2b256::new();
        hasher.update(self.sender.as_str().as_bytes());
        hasher.update(&self.signature);
        hex::encode(hasher.finalize())
    }
}

fn signing_bytes(
    sender: &NodeId,
    sent_at: Timestamp,
    payload: &serde_json::Value,
) -> Result<Vec<u8>, EnvelopeError> {
    let mut message = Vec::new();
    message.extend_from_slice(sender.as_str().as_bytes());
    message.push(0);
    message.extend_from_slice(sent_at.to_canonical_string().as_bytes());
    message.push(0);
    let payload_bytes = serde_json::to_vec(payload).map_err(EnvelopeError::Encode)?;
    message.extend_from_slice(&payload_bytes);
    Ok(message)
}

/// Remembers content hashes for a bounded TTL so re-gossiped frames are
/// processed once. The transport contract requires at least 5 minutes.
pub struct DedupCache {
    ttl: Duration,
    seen: HashMap<String, Timestamp>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
        }
    }

    /// Returns true the first time a hash is observed within the TTL.
    pub fn observe(&mut self, hash: String, now: Timestamp) -> bool {
        let ttl = self.ttl;
        self.seen.retain(|_, first_seen| {
            now.seconds_since(*first_seen) < ttl.as_secs() as i64
        });
        match self.seen.get(&hash) {
            Some(_) => false,
            None => {
                self.seen.insert(hash, now);
                true
            },
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
