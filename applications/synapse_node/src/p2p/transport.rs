// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! The transport contract the core consumes, and an in-process loopback
//! implementation.
//!
//! A production deployment plugs an encrypted peer-to-peer transport in
//! here (authenticated sender metadata, topic pub/sub, content-hash dedup
//! with ≥5 min TTL). The loopback hub provides the same interface between
//! nodes hosted in one process, which is what the integration tests and
//! single-node operation use.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub topic: String,
    pub frame: Vec<u8>,
}

#[async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str) -> anyhow::Result<()>;
    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()>;
    async fn publish(&self, topic: &str, frame: Vec<u8>) -> anyhow::Result<()>;
}

type Subscribers = HashMap<String, Vec<(usize, mpsc::UnboundedSender<InboundFrame>)>>;

/// Shared switchboard connecting the loopback transports of co-hosted nodes.
#[derive(Default)]
pub struct LoopbackHub {
    subscribers: Mutex<Subscribers>,
    next_peer: AtomicUsize,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connects a node; frames published by other peers on subscribed
    /// topics arrive on the returned transport's inbound channel.
    pub fn connect(self: &Arc<Self>) -> (LoopbackTransport, mpsc::UnboundedReceiver<InboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = LoopbackTransport {
            hub: Arc::clone(self),
            peer_id: self.next_peer.fetch_add(1, Ordering::Relaxed),
            tx,
        };
        (transport, rx)
    }
}

pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    peer_id: usize,
    tx: mpsc::UnboundedSender<InboundFrame>,
}

#[async_trait]
impl GossipTransport for LoopbackTransport {
    async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        let mut subscribers = self.hub.subscribers.lock().expect("loopback hub lock");
        let entries = subscribers.entry(topic.to_string()).or_default();
        if !entries.iter().any(|(peer, _)| *peer == self.peer_id) {
            entries.push((self.peer_id, self.tx.clone()));
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        let mut subscribers = self.hub.subscribers.lock().expect("loopback hub lock");
        if let Some(entries) = subscribers.get_mut(topic) {
            entries.retain(|(peer, _)| *peer != self.peer_id);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, frame: Vec<u8>) -> anyhow::Result<()> {
        let subscribers = self.hub.subscribers.lock().expect("loopback hub lock");
        if let Some(entries) = subscribers.get(topic) {
            for (peer, tx) in entries {
                if *peer == self.peer_id {
                    continue;
                }
                let _ = tx.send(InboundFrame {
                    topic: topic.to_string(),
                    frame: frame.clone(),
                });
            }
        }
        Ok(())
    }
}
