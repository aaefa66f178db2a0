// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! The periodic maintenance loops: proposal auto-close (plus auction
//! finalization), command dispatch, reputation decay and common-tools
//! billing. Each loop is an independent timer owned by its own task; all
//! state changes go through the store's write section and disseminate via
//! the gossip fan-out.

use std::time::Duration;

use log::*;
use synapse_common_types::{shutdown::ShutdownSignal, ChannelId, ProposalId, TaskId, Timestamp};
use synapse_engine::{commands, governance, reputation, tasks, tools};
use synapse_state::{messages::GossipPayload, models::TaskStatus, StateStore};
use tokio::task::JoinHandle;

use crate::p2p::gossip::GossipHandle;

const LOG_TARGET: &str = "synapse::node::workers";

const PROPOSAL_CLOSE_INTERVAL: Duration = Duration::from_secs(60);
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Closes proposals past their deadline and finalizes expired auctions.
pub fn spawn_proposal_closer(
    store: StateStore,
    gossip: GossipHandle,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROPOSAL_CLOSE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {
                    let now = Timestamp::now();
                    let (closed, finalized) = store
                        .with_write(|state| {
                            let due_proposals: Vec<(ChannelId, ProposalId)> = state
                                .channels
                                .iter()
                                .flat_map(|(channel_id, channel)| {
                                    channel.proposals.values().filter_map(|proposal| {
                                        (proposal.status.is_open() && now >= proposal.closes_at)
                                            .then(|| (channel_id.clone(), proposal.id.clone()))
                                    }).collect::<Vec<_>>()
                                })
                                .collect();
                            for (_, proposal_id) in &due_proposals {
                                if let Err(e) = governance::close_proposal(state, proposal_id, now) {
                                    warn!(target: LOG_TARGET, "Auto-close of {} failed: {}", proposal_id, e);
                                }
                            }

                            let due_auctions: Vec<(ChannelId, TaskId)> = state
                                .channels
                                .iter()
                                .flat_map(|(channel_id, channel)| {
                                    channel.tasks.values().filter_map(|task| {
                                        let due = task.status == TaskStatus::AuctionOpen
                                            && task.auction.as_ref().is_some_and(|a| now >= a.deadline);
                                        due.then(|| (channel_id.clone(), task.id.clone()))
                                    }).collect::<Vec<_>>()
                                })
                                .collect();
                            let mut finalized = Vec::new();
                            for (channel_id, task_id) in due_auctions {
                                match tasks::finalize_auction(state, &channel_id, &task_id, now) {
                                    Ok(task) => finalized.push((channel_id, task)),
                                    Err(e) => {
                                        warn!(target: LOG_TARGET, "Auction finalize of {} failed: {}", task_id, e)
                                    },
                                }
                            }
                            (due_proposals, finalized)
                        })
                        .await?;

                    for (channel, proposal_id) in closed {
                        publish_proposal(&store, &gossip, &channel, &proposal_id).await;
                    }
                    for (channel, task) in finalized {
                        if let Err(e) = gossip.publish(&GossipPayload::Task { channel, task }).await {
                            warn!(target: LOG_TARGET, "Failed to gossip finalized auction: {}", e);
                        }
                    }
                },
            }
        }
        Ok(())
    })
}

/// Reactive poll that keeps `last_executed_command_index` caught up with
/// the log, publishing the log when anything new ran.
pub fn spawn_command_dispatcher(
    store: StateStore,
    gossip: GossipHandle,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DISPATCH_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {
                    let now = Timestamp::now();
                    let (executed, log) = store
                        .with_write(|state| {
                            let executed = commands::run_pending(state, now);
                            (executed, state.execution_log.clone())
                        })
                        .await?;
                    if executed > 0 {
                        info!(target: LOG_TARGET, "Dispatcher executed {} commands", executed);
                        if let Err(e) = gossip.publish(&GossipPayload::ExecutionLog { entries: log }).await {
                            warn!(target: LOG_TARGET, "Failed to gossip execution log: {}", e);
                        }
                    }
                },
            }
        }
        Ok(())
    })
}

/// Daily reputation decay. The interval is replicated config, re-read every
/// cycle so ratified changes take effect without restart.
pub fn spawn_reputation_decay(store: StateStore, mut shutdown: ShutdownSignal) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        loop {
            let interval = store
                .with_read(|state| state.config.reputation_decay_interval_seconds)
                .await;
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(Duration::from_secs(interval.max(1))) => {
                    let now = Timestamp::now();
                    let touched = store.with_write(|state| reputation::apply_decay(state, now)).await?;
                    debug!(target: LOG_TARGET, "Decay tick touched {} nodes", touched);
                },
            }
        }
        Ok(())
    })
}

/// Daily common-tools billing.
pub fn spawn_tools_billing(store: StateStore, mut shutdown: ShutdownSignal) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        loop {
            let interval = store
                .with_read(|state| state.config.common_tools_billing_interval_seconds)
                .await;
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(Duration::from_secs(interval.max(1))) => {
                    let now = Timestamp::now();
                    let report = store.with_write(|state| tools::run_billing_cycle(state, now)).await?;
                    if report.paid + report.suspended + report.reactivated > 0 {
                        info!(
                            target: LOG_TARGET,
                            "Billing tick: {} paid, {} suspended, {} reactivated",
                            report.paid,
                            report.suspended,
                            report.reactivated
                        );
                    }
                },
            }
        }
        Ok(())
    })
}

async fn publish_proposal(store: &StateStore, gossip: &GossipHandle, channel: &ChannelId, proposal_id: &ProposalId) {
    let payload = store
        .with_read(|state| {
            state
                .channel(channel)
                .and_then(|c| c.proposals.get(proposal_id))
                .cloned()
                .map(|proposal| GossipPayload::Proposal {
                    channel: channel.clone(),
                    proposal,
                })
        })
        .await;
    if let Some(payload) = payload {
        if let Err(e) = gossip.publish(&payload).await {
            warn!(target: LOG_TARGET, "Failed to gossip closed proposal: {}", e);
        }
    }
}
