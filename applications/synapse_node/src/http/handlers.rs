// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! REST handlers. Every mutation requires a node signature over the raw
//! request body (`x-synapse-public-key` / `x-synapse-signature` headers);
//! the request acts as the signing identity. Unsigned mutations are
//! rejected. All mutations gossip their result.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::HeaderMap,
    Json,
};
use log::*;
use serde::Deserialize;
use serde_json::{json, Value};
use synapse_common_types::{ChannelId, NodeId, ProposalId, TaskId, Timestamp, ToolId};
use synapse_crypto::{identity, SynapseKeypair};
use synapse_engine::{economy, governance, tasks, tools, tools::ToolExecutor};
use synapse_state::{
    messages::GossipPayload,
    models::{NetworkState, VoteChoice},
    schema,
    StateStore,
};

use super::error::ApiError;
use crate::p2p::gossip::GossipHandle;

const LOG_TARGET: &str = "synapse::node::http";

pub struct ApiContext {
    pub keypair: Arc<SynapseKeypair>,
    pub store: StateStore,
    pub gossip: GossipHandle,
    pub executor: Arc<ToolExecutor>,
    pub started_at: Timestamp,
}

impl ApiContext {
    /// Verifies the body signature and resolves the acting identity. Every
    /// mutation must be signed; there is no unsigned fallback.
    fn authenticate(&self, headers: &HeaderMap, body: &[u8]) -> Result<NodeId, ApiError> {
        let (Some(public_key), Some(signature)) = (
            headers.get("x-synapse-public-key"),
            headers.get("x-synapse-signature"),
        ) else {
            return Err(ApiError::BadSignature(
                "x-synapse-public-key and x-synapse-signature headers are required on mutations".to_string(),
            ));
        };
        let public_key = hex::decode(public_key.as_bytes())
            .map_err(|_| ApiError::BadSignature("public key is not hex".to_string()))?;
        let signature = hex::decode(signature.as_bytes())
            .map_err(|_| ApiError::BadSignature("signature is not hex".to_string()))?;
        if !identity::verify(&public_key, body, &signature) {
            return Err(ApiError::BadSignature("verification failed".to_string()));
        }
        identity::fingerprint_bytes(&public_key)
            .ok_or_else(|| ApiError::BadSignature("invalid public key".to_string()))
    }

    /// For endpoints whose effects are published under this node's own
    /// envelope signature, the request must also be signed by this node's
    /// identity rather than a remote one.
    fn authenticate_local(&self, headers: &HeaderMap, body: &[u8]) -> Result<NodeId, ApiError> {
        let caller = self.authenticate(headers, body)?;
        if caller != *self.keypair.node_id() {
            return Err(ApiError::BadSignature(
                "this endpoint must be signed by this node's own identity".to_string(),
            ));
        }
        Ok(caller)
    }

    async fn publish(&self, payload: GossipPayload) {
        if let Err(e) = self.gossip.publish(&payload).await {
            warn!(target: LOG_TARGET, "Failed to gossip local mutation: {}", e);
        }
    }

    async fn publish_task(&self, channel: &ChannelId, task: synapse_state::models::Task) {
        self.publish(GossipPayload::Task {
            channel: channel.clone(),
            task,
        })
        .await;
    }

    async fn publish_proposal(&self, channel: &ChannelId, proposal_id: &ProposalId) {
        let payload = self
            .store
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
            self.publish(payload).await;
        }
    }

    async fn publish_node_record(&self, node_id: &NodeId) {
        let payload = self
            .store
            .with_read(|state| state.node(node_id).cloned().map(|node| GossipPayload::NodeRecord { node }))
            .await;
        if let Some(payload) = payload {
            self.publish(payload).await;
        }
    }
}

#[derive(Deserialize)]
pub struct ChannelQuery {
    channel: Option<String>,
}

impl ChannelQuery {
    fn channel(&self) -> ChannelId {
        self.channel
            .as_deref()
            .map(ChannelId::new)
            .unwrap_or_else(ChannelId::global)
    }
}

fn parse_json(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

// ---------------------------------------------------------------- queries

pub async fn get_state(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<NetworkState> {
    Json(ctx.store.with_read(Clone::clone).await)
}

pub async fn whoami(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<Value> {
    Json(json!({
        "node_id": ctx.keypair.node_id(),
        "public_key": hex::encode(ctx.keypair.public_key_bytes()),
    }))
}

pub async fn health(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<Value> {
    let now = Timestamp::now();
    let (peers, channels) = ctx
        .store
        .with_read(|state| (state.nodes.len(), state.channels.len()))
        .await;
    Json(json!({
        "status": "ok",
        "uptime_seconds": now.seconds_since(ctx.started_at),
        "peers": peers,
        "channels": channels,
    }))
}

pub async fn get_peers(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<Value> {
    let peers = ctx
        .store
        .with_read(|state| {
            state
                .nodes
                .values()
                .map(|node| {
                    json!({
                        "id": node.id,
                        "url": node.url,
                        "last_seen": node.last_seen,
                        "reputation": node.reputation.total,
                        "balance_sp": node.balance_sp,
                        "subscribed_channels": node.subscribed_channels,
                    })
                })
                .collect::<Vec<_>>()
        })
        .await;
    Json(json!({ "peers": peers }))
}

pub async fn get_config(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<Value> {
    let config = ctx.store.with_read(|state| state.config.clone()).await;
    Json(serde_json::to_value(config).expect("config serializes infallibly"))
}

pub async fn get_validators(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<Value> {
    let validators = ctx.store.with_read(|state| state.validator_set.clone()).await;
    let threshold = governance::majority_threshold(validators.len());
    Json(json!({
        "validators": validators,
        "majority_threshold": threshold,
    }))
}

pub async fn get_commands(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<Value> {
    let (log, last_executed) = ctx
        .store
        .with_read(|state| (state.execution_log.clone(), state.last_executed_command_index))
        .await;
    Json(json!({
        "execution_log": log,
        "last_executed_command_index": last_executed,
    }))
}

pub async fn get_command(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(command_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let entry = ctx
        .store
        .with_read(|state| {
            state
                .execution_log
                .iter()
                .find(|entry| entry.command_id.as_str() == command_id)
                .cloned()
        })
        .await;
    entry
        .map(|entry| Json(serde_json::to_value(entry).expect("log entries serialize infallibly")))
        .ok_or(ApiError::NotFound)
}

pub async fn get_schemas(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<Value> {
    let names = ctx
        .store
        .with_read(|state| state.schemas.keys().cloned().collect::<Vec<_>>())
        .await;
    Json(json!({ "schemas": names }))
}

pub async fn get_schema(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let schema = ctx.store.with_read(|state| state.schemas.get(&name).cloned()).await;
    schema
        .map(|schema| Json(serde_json::to_value(schema).expect("schemas serialize infallibly")))
        .ok_or(ApiError::NotFound)
}

#[derive(Deserialize)]
pub struct ValidateQuery {
    schema_name: String,
}

pub async fn validate_schema(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Query(query): Query<ValidateQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let data = parse_json(&body)?;
    let validated = ctx
        .store
        .with_read(|state| schema::validate(&state.schemas, &query.schema_name, &data))
        .await?;
    Ok(Json(validated))
}

// ------------------------------------------------------------------ tasks

pub async fn create_task(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let data = parse_json(&body)?;
    let channel = query.channel();
    let now = Timestamp::now();

    let schema_name = data
        .get("schema_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if data.get("required_tools").is_some() {
                "task_v2".to_string()
            } else {
                "task_v1".to_string()
            }
        });

    let task = ctx
        .store
        .with_write(|state| {
            let validated = schema::validate(&state.schemas, &schema_name, &data)?;
            tasks::create_task(state, &channel, caller, &schema_name, &validated, now).map_err(ApiError::from)
        })
        .await??;
    ctx.publish_task(&channel, task.clone()).await;
    Ok(Json(serde_json::to_value(task).expect("tasks serialize infallibly")))
}

async fn task_transition<F>(
    ctx: &ApiContext,
    channel: ChannelId,
    mutate: F,
) -> Result<Json<Value>, ApiError>
where F: FnOnce(&mut NetworkState) -> Result<synapse_state::models::Task, tasks::TaskError> + Send {
    let task = ctx.store.with_write(mutate).await??;
    ctx.publish_task(&channel, task.clone()).await;
    Ok(Json(serde_json::to_value(task).expect("tasks serialize infallibly")))
}

pub async fn claim_task(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let channel = query.channel();
    let id = TaskId::new(task_id);
    let now = Timestamp::now();
    task_transition(&ctx, channel.clone(), move |state| {
        tasks::claim_task(state, &channel, &id, caller, now)
    })
    .await
}

pub async fn progress_task(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let channel = query.channel();
    let id = TaskId::new(task_id);
    let now = Timestamp::now();
    task_transition(&ctx, channel.clone(), move |state| {
        tasks::progress_task(state, &channel, &id, &caller, now)
    })
    .await
}

pub async fn complete_task(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let channel = query.channel();
    let id = TaskId::new(task_id);
    let now = Timestamp::now();
    let response = task_transition(&ctx, channel.clone(), {
        let caller = caller.clone();
        move |state| tasks::complete_task(state, &channel, &id, &caller, now)
    })
    .await?;
    // Completion moved reputation and balances; announce the new standing
    ctx.publish_node_record(&caller).await;
    Ok(response)
}

pub async fn delete_task(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let channel = query.channel();
    let id = TaskId::new(task_id);
    let now = Timestamp::now();
    task_transition(&ctx, channel.clone(), move |state| {
        tasks::delete_task(state, &channel, &id, &caller, now)
    })
    .await
}

#[derive(Deserialize)]
pub struct AuctionBody {
    #[serde(default = "default_auction_duration")]
    duration_seconds: u64,
}

fn default_auction_duration() -> u64 {
    86_400
}

pub async fn start_auction(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let auction: AuctionBody = if body.is_empty() {
        AuctionBody {
            duration_seconds: default_auction_duration(),
        }
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let channel = query.channel();
    let id = TaskId::new(task_id);
    let now = Timestamp::now();
    task_transition(&ctx, channel.clone(), move |state| {
        tasks::start_auction(
            state,
            &channel,
            &id,
            &caller,
            std::time::Duration::from_secs(auction.duration_seconds),
            now,
        )
    })
    .await
}

#[derive(Deserialize)]
pub struct BidBody {
    amount_sp: u64,
    estimated_days: u32,
}

pub async fn bid_task(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let bid: BidBody = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let channel = query.channel();
    let id = TaskId::new(task_id);
    let now = Timestamp::now();
    task_transition(&ctx, channel.clone(), move |state| {
        tasks::place_bid(state, &channel, &id, caller, bid.amount_sp, bid.estimated_days, now)
    })
    .await
}

// -------------------------------------------------------------- proposals

pub async fn create_proposal(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let data = parse_json(&body)?;
    let channel = query.channel();
    let now = Timestamp::now();

    let proposal = ctx
        .store
        .with_write(|state| {
            let validated = schema::validate(&state.schemas, "proposal_v1", &data)?;
            governance::create_proposal(state, &channel, caller, &validated, now).map_err(ApiError::from)
        })
        .await??;
    ctx.publish_proposal(&channel, &proposal.id).await;
    Ok(Json(serde_json::to_value(proposal).expect("proposals serialize infallibly")))
}

#[derive(Deserialize)]
pub struct VoteBody {
    choice: VoteChoice,
}

pub async fn vote_proposal(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(proposal_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let vote: VoteBody = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let id = ProposalId::new(proposal_id);
    let now = Timestamp::now();

    ctx.store
        .with_write(|state| governance::submit_vote(state, &id, caller, vote.choice, now))
        .await??;
    ctx.publish_proposal(&query.channel(), &id).await;
    Ok(Json(json!({ "status": "accepted" })))
}

pub async fn close_proposal(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(proposal_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // Closing is deterministic and any node may trigger it, but it is
    // still a mutation and must be signed
    ctx.authenticate(&headers, &body)?;
    let id = ProposalId::new(proposal_id);
    let now = Timestamp::now();
    let outcome = ctx
        .store
        .with_write(|state| governance::close_proposal(state, &id, now))
        .await??;
    ctx.publish_proposal(&query.channel(), &id).await;
    Ok(Json(serde_json::to_value(outcome).expect("outcomes serialize infallibly")))
}

pub async fn ratify_proposal(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(proposal_id): Path<String>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // Validators ratify through their own node: the approval gossips under
    // this node's envelope signature, so the request must be signed by
    // this node's own identity
    let validator = ctx.authenticate_local(&headers, &body)?;
    let id = ProposalId::new(proposal_id);
    let channel = query.channel();
    let now = Timestamp::now();

    let status = ctx
        .store
        .with_write(|state| governance::record_ratification(state, &id, validator, now))
        .await??;
    ctx.publish(GossipPayload::RatificationApproval {
        channel: channel.clone(),
        proposal_id: id.clone(),
    })
    .await;
    ctx.publish_proposal(&channel, &id).await;

    let response = match status {
        governance::RatificationStatus::Pending { approvals, threshold } => {
            json!({ "status": "pending", "approvals": approvals, "threshold": threshold })
        },
        governance::RatificationStatus::Ratified { command_id } => {
            json!({ "status": "ratified", "command_id": command_id })
        },
    };
    Ok(Json(response))
}

// ------------------------------------------------------------------ tools

#[derive(Deserialize)]
pub struct ExecuteQuery {
    channel: Option<String>,
    task_id: String,
}

pub async fn execute_tool(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(tool_id): Path<String>,
    Query(query): Query<ExecuteQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = ctx.authenticate(&headers, &body)?;
    let channel = query
        .channel
        .as_deref()
        .map(ChannelId::new)
        .unwrap_or_else(ChannelId::global);
    let tool_id = ToolId::new(tool_id);
    let task_id = TaskId::new(query.task_id.clone());
    let request_body = if body.is_empty() { json!({}) } else { parse_json(&body)? };

    let tool = ctx
        .store
        .with_read(|state| tools::authorize_execution(state, &channel, &tool_id, &caller, &task_id))
        .await?;
    let result = ctx.executor.execute(&channel, &tool, &request_body).await?;
    Ok(Json(result))
}

// --------------------------------------------------------------- channels

pub async fn subscribe_channel(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let node_id = ctx.authenticate_local(&headers, &body)?;
    let channel = ChannelId::new(channel);
    let now = Timestamp::now();
    ctx.store
        .with_write(|state| {
            state.channel_entry(&channel);
            if let Some(node) = state.node_mut(&node_id) {
                node.subscribed_channels.insert(channel.clone());
                node.updated_at = now;
            }
        })
        .await?;
    if let Err(e) = ctx.gossip.subscribe_channel(&channel).await {
        warn!(target: LOG_TARGET, "Transport subscribe failed for {}: {}", channel, e);
    }
    ctx.publish_node_record(&node_id).await;
    Ok(Json(json!({ "subscribed": channel })))
}

pub async fn unsubscribe_channel(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let node_id = ctx.authenticate_local(&headers, &body)?;
    let channel = ChannelId::new(channel);
    if channel.is_global() {
        return Err(ApiError::BadRequest("the global channel cannot be left".to_string()));
    }
    let now = Timestamp::now();
    ctx.store
        .with_write(|state| {
            if let Some(node) = state.node_mut(&node_id) {
                node.subscribed_channels.remove(&channel);
                node.updated_at = now;
            }
        })
        .await?;
    if let Err(e) = ctx.gossip.unsubscribe_channel(&channel).await {
        warn!(target: LOG_TARGET, "Transport unsubscribe failed for {}: {}", channel, e);
    }
    ctx.publish_node_record(&node_id).await;
    Ok(Json(json!({ "unsubscribed": channel })))
}

// ---------------------------------------------------------------- balance

pub async fn get_balance(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(node_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = NodeId::new(node_id);
    let response = ctx
        .store
        .with_read(|state| {
            state.node(&id).map(|node| {
                json!({
                    "node_id": node.id,
                    "balance_sp": node.balance_sp,
                    "available_sp": economy::available_balance(state, &id),
                })
            })
        })
        .await;
    response.map(Json).ok_or(ApiError::NotFound)
}
