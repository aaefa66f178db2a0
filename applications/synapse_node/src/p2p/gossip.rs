// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! The gossip service: periodic anti-entropy fan-out of local state and the
//! inbound pump feeding verified envelopes into the merge pipeline.

use std::{sync::Arc, time::Duration};

use log::*;
use synapse_common_types::{shutdown::ShutdownSignal, ChannelId, Timestamp};
use synapse_crypto::SynapseKeypair;
use synapse_engine::ingest;
use synapse_state::{
    messages::{topics, DedupCache, GossipPayload, SignedEnvelope},
    StateStore,
};
use tokio::{sync::mpsc, task::JoinHandle};

use super::{GossipTransport, InboundFrame};

const LOG_TARGET: &str = "synapse::node::p2p::gossip";

const DEDUP_TTL: Duration = Duration::from_secs(300);

/// Cheap clonable handle used by the HTTP layer and workers to push local
/// mutations onto the wire.
#[derive(Clone)]
pub struct GossipHandle {
    keypair: Arc<SynapseKeypair>,
    transport: Arc<dyn GossipTransport>,
}

impl GossipHandle {
    pub async fn subscribe_channel(&self, channel: &ChannelId) -> anyhow::Result<()> {
        self.transport.subscribe(&topics::for_channel(channel)).await
    }

    pub async fn unsubscribe_channel(&self, channel: &ChannelId) -> anyhow::Result<()> {
        self.transport.unsubscribe(&topics::for_channel(channel)).await
    }

    pub async fn publish(&self, payload: &GossipPayload) -> anyhow::Result<()> {
        let topic = match payload {
            GossipPayload::Task { channel, .. }
            | GossipPayload::Proposal { channel, .. }
            | GossipPayload::CommonTool { channel, .. } => topics::for_channel(channel),
            GossipPayload::NodeRecord { .. }
            | GossipPayload::RatificationApproval { .. }
            | GossipPayload::ExecutionLog { .. }
            | GossipPayload::Schema { .. } => topics::NETWORK.to_string(),
        };
        let envelope = SignedEnvelope::seal(&self.keypair, payload)?;
        let frame = serde_json::to_vec(&envelope)?;
        self.transport.publish(&topic, frame).await
    }
}

pub struct GossipService {
    keypair: Arc<SynapseKeypair>,
    store: StateStore,
    handle: GossipHandle,
    rx_inbound: mpsc::UnboundedReceiver<InboundFrame>,
    dedup: DedupCache,
    last_fanout: Timestamp,
    shutdown: ShutdownSignal,
}

pub fn spawn(
    keypair: Arc<SynapseKeypair>,
    store: StateStore,
    transport: Arc<dyn GossipTransport>,
    rx_inbound: mpsc::UnboundedReceiver<InboundFrame>,
    shutdown: ShutdownSignal,
) -> (GossipHandle, JoinHandle<anyhow::Result<()>>) {
    let handle = GossipHandle {
        keypair: keypair.clone(),
        transport,
    };
    let service = GossipService {
        keypair,
        store,
        handle: handle.clone(),
        rx_inbound,
        dedup: DedupCache::new(DEDUP_TTL),
        last_fanout: Timestamp::now(),
        shutdown,
    };
    let join_handle = tokio::spawn(service.run());
    (handle, join_handle)
}

impl GossipService {
    async fn run(mut self) -> anyhow::Result<()> {
        self.handle.transport.subscribe(topics::NETWORK).await?;
        let subscribed = self
            .store
            .with_read(|state| {
                state
                    .node(self.keypair.node_id())
                    .map(|node| node.subscribed_channels.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_else(|| vec![ChannelId::global()])
            })
            .await;
        for channel in subscribed {
            self.handle.subscribe_channel(&channel).await?;
        }

        loop {
            let interval = self
                .store
                .with_read(|state| state.config.gossip_interval_seconds)
                .await;
            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!(target: LOG_TARGET, "Gossip service shutting down");
                    break;
                },
                maybe_frame = self.rx_inbound.recv() => {
                    match maybe_frame {
                        Some(frame) => self.handle_frame(frame).await,
                        None => {
                            warn!(target: LOG_TARGET, "Transport inbound channel closed");
                            break;
                        },
                    }
                },
                _ = tokio::time::sleep(Duration::from_secs(interval.max(1))) => {
                    if let Err(e) = self.fan_out().await {
                        warn!(target: LOG_TARGET, "Gossip fan-out failed: {}", e);
                    }
                },
            }
        }
        Ok(())
    }

    /// Decodes, dedups, verifies and merges one inbound frame. Errors are
    /// logged and dropped; nothing propagates back to the sender.
    async fn handle_frame(&mut self, inbound: InboundFrame) {
        let now = Timestamp::now();
        let envelope: SignedEnvelope = match serde_json::from_slice(&inbound.frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(target: LOG_TARGET, "Undecodable frame on {}: {}", inbound.topic, e);
                return;
            },
        };
        if !self.dedup.observe(envelope.content_hash(), now) {
            return;
        }
        let payload = match envelope.verify_and_open() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: LOG_TARGET, "Dropping envelope from {}: {}", envelope.sender, e);
                return;
            },
        };

        let sender = envelope.sender.clone();
        let result = self
            .store
            .with_write(|state| ingest::apply(state, &sender, payload, now))
            .await;
        match result {
            Ok(Ok(applied)) => {
                if applied {
                    debug!(target: LOG_TARGET, "Merged gossip from {}", sender);
                }
            },
            Ok(Err(e)) => warn!(target: LOG_TARGET, "Rejected gossip from {}: {}", sender, e),
            Err(e) => error!(target: LOG_TARGET, "State write failed during merge: {}", e),
        }
    }

    /// Anti-entropy tick: always re-announce the local node record and the
    /// execution log, plus every channel object that changed since the last
    /// tick.
    async fn fan_out(&mut self) -> anyhow::Result<()> {
        let now = Timestamp::now();
        let since = self.last_fanout;
        self.last_fanout = now;
        let node_id = self.keypair.node_id().clone();

        let (payloads, refreshed) = self
            .store
            .with_write(|state| {
                let mut payloads = Vec::new();
                if let Some(node) = state.node_mut(&node_id) {
                    node.last_seen = now;
                    payloads.push(GossipPayload::NodeRecord { node: node.clone() });
                }
                if !state.execution_log.is_empty() {
                    payloads.push(GossipPayload::ExecutionLog {
                        entries: state.execution_log.clone(),
                    });
                }
                let subscribed: Vec<ChannelId> = state
                    .node(&node_id)
                    .map(|node| node.subscribed_channels.iter().cloned().collect())
                    .unwrap_or_default();
                for channel_id in &subscribed {
                    let Some(channel) = state.channel(channel_id) else {
                        continue;
                    };
                    for task in channel.tasks.values().filter(|t| t.updated_at >= since) {
                        payloads.push(GossipPayload::Task {
                            channel: channel_id.clone(),
                            task: task.clone(),
                        });
                    }
                    for proposal in channel.proposals.values().filter(|p| p.updated_at >= since) {
                        payloads.push(GossipPayload::Proposal {
                            channel: channel_id.clone(),
                            proposal: proposal.clone(),
                        });
                    }
                    for tool in channel.common_tools.values().filter(|t| t.updated_at >= since) {
                        payloads.push(GossipPayload::CommonTool {
                            channel: channel_id.clone(),
                            tool: tool.clone(),
                        });
                    }
                }
                (payloads, subscribed.len())
            })
            .await?;

        trace!(
            target: LOG_TARGET,
            "Fan-out of {} payloads across {} channels",
            payloads.len(),
            refreshed
        );
        for payload in &payloads {
            self.handle.publish(payload).await?;
        }
        Ok(())
    }
}
