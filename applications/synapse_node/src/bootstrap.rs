// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;

use anyhow::anyhow;
use futures::{future, FutureExt};
use log::*;
use synapse_common_types::{shutdown::ShutdownSignal, ChannelId, Timestamp};
use synapse_crypto::SynapseKeypair;
use synapse_engine::{economy, governance, tools::ToolExecutor};
use synapse_state::StateStore;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    config::ApplicationConfig,
    p2p::{gossip, gossip::GossipHandle, GossipTransport, InboundFrame},
    workers,
};

const LOG_TARGET: &str = "synapse::node::bootstrap";

pub struct Services {
    pub keypair: Arc<SynapseKeypair>,
    pub store: StateStore,
    pub gossip: GossipHandle,
    pub executor: Arc<ToolExecutor>,
    pub handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl Services {
    pub async fn on_any_exit(&mut self) -> anyhow::Result<()> {
        // JoinHandle panics if polled again after completion; fuse to prevent it
        let fused = self.handles.iter_mut().map(|h| h.fuse());
        let (res, _, _) = future::select_all(fused).await;
        res.unwrap_or_else(|e| Err(anyhow!("Service task panicked: {}", e)))
    }
}

pub async fn spawn_services(
    config: &ApplicationConfig,
    keypair: SynapseKeypair,
    store: StateStore,
    transport: Arc<dyn GossipTransport>,
    rx_inbound: mpsc::UnboundedReceiver<InboundFrame>,
    shutdown: ShutdownSignal,
) -> Result<Services, anyhow::Error> {
    let keypair = Arc::new(keypair);
    let now = Timestamp::now();

    // Register the local node and its configured channels before anything
    // is gossiped
    let node_id = keypair.node_id().clone();
    let public_key = keypair.public_key_bytes().to_vec();
    let channels: Vec<ChannelId> = config.node.channels.iter().map(ChannelId::new).collect();
    store
        .with_write(|state| {
            let node = state.ensure_node(&node_id, public_key, now);
            for channel in &channels {
                node.subscribed_channels.insert(channel.clone());
            }
            node.updated_at = now;
            for channel in &channels {
                state.channel_entry(channel);
            }
            economy::recompute_balances(state);
            governance::recompute_validator_set(state);
        })
        .await?;

    info!(target: LOG_TARGET, "Gossip service initializing");
    let mut handles = Vec::with_capacity(5);
    let (gossip_handle, join_handle) = gossip::spawn(
        keypair.clone(),
        store.clone(),
        transport,
        rx_inbound,
        shutdown.clone(),
    );
    handles.push(join_handle);

    info!(target: LOG_TARGET, "Maintenance workers initializing");
    handles.push(workers::spawn_proposal_closer(
        store.clone(),
        gossip_handle.clone(),
        shutdown.clone(),
    ));
    handles.push(workers::spawn_command_dispatcher(
        store.clone(),
        gossip_handle.clone(),
        shutdown.clone(),
    ));
    handles.push(workers::spawn_reputation_decay(store.clone(), shutdown.clone()));
    handles.push(workers::spawn_tools_billing(store.clone(), shutdown));

    Ok(Services {
        keypair,
        store,
        gossip: gossip_handle,
        executor: Arc::new(ToolExecutor::new()),
        handles,
    })
}
