// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! HTTP API behavior against a single live node.

mod support;

use serde_json::json;
use support::spawn_node;
use synapse_common_types::{ChannelId, NodeId, TaskId, Timestamp, ToolId};
use synapse_node::p2p::LoopbackHub;
use synapse_state::models::{CommonTool, NetworkConfig, Task, TaskStatus, ToolKind, ToolStatus};

fn instant_voting() -> NetworkConfig {
    NetworkConfig {
        proposal_voting_period_seconds: 0,
        ..NetworkConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn whoami_and_health() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;

    let (status, body) = node.request("GET", "/whoami", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["node_id"], node.node_id.as_str());
    assert!(!body["public_key"].as_str().unwrap().is_empty());

    let (status, body) = node.request("GET", "/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["peers"], 1);

    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn task_lifecycle_over_http() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;

    let (status, task) = node
        .request(
            "POST",
            "/tasks?channel=global",
            Some(json!({"title": "Fix the gossip loop", "tags": ["rust"], "reward": 100})),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(task["status"], "open");
    let task_id = task["id"].as_str().unwrap().to_string();

    let (status, _) = node
        .request("POST", &format!("/tasks/{}/claim?channel=global", task_id), Some(json!({})))
        .await;
    assert_eq!(status, 200);
    let (status, _) = node
        .request("POST", &format!("/tasks/{}/progress?channel=global", task_id), Some(json!({})))
        .await;
    assert_eq!(status, 200);
    let (status, done) = node
        .request("POST", &format!("/tasks/{}/complete?channel=global", task_id), Some(json!({})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(done["status"], "completed");

    // Same node created and completed: -100 then +98, tax 2 to the treasury
    let (status, balance) = node
        .request("GET", &format!("/balances/{}", node.node_id), None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(balance["balance_sp"], 998);

    let (_, state) = node.request("GET", "/state", None).await;
    assert_eq!(state["channels"]["global"]["treasury_balance"], 2);

    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn insufficient_balance_is_402() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;
    let (status, body) = node
        .request(
            "POST",
            "/tasks?channel=global",
            Some(json!({"title": "too expensive", "reward": 5000})),
        )
        .await;
    assert_eq!(status, 402);
    assert!(body["error"].as_str().unwrap().contains("Insufficient"));
    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn proposal_flow_over_http() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, instant_voting()).await;

    let (status, proposal) = node
        .request(
            "POST",
            "/proposals?channel=global",
            Some(json!({"title": "be generic", "proposal_type": "generic", "tags": []})),
        )
        .await;
    assert_eq!(status, 200);
    let proposal_id = proposal["id"].as_str().unwrap().to_string();

    let (status, _) = node
        .request(
            "POST",
            &format!("/proposals/{}/vote?channel=global", proposal_id),
            Some(json!({"choice": "yes"})),
        )
        .await;
    assert_eq!(status, 200);

    let (status, outcome) = node
        .request("POST", &format!("/proposals/{}/close?channel=global", proposal_id), Some(json!({})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(outcome["approved"], true);

    let (_, state) = node.request("GET", "/state", None).await;
    assert_eq!(
        state["channels"]["global"]["proposals"][&proposal_id]["status"],
        "closed_approved"
    );
    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_endpoints() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;

    let (status, schemas) = node.request("GET", "/schemas", None).await;
    assert_eq!(status, 200);
    let names: Vec<String> = serde_json::from_value(schemas["schemas"].clone()).unwrap();
    assert!(names.contains(&"task_v2".to_string()));

    let (status, _) = node.request("GET", "/schemas/task_v1", None).await;
    assert_eq!(status, 200);
    let (status, _) = node.request("GET", "/schemas/nope_v1", None).await;
    assert_eq!(status, 404);

    let (status, validated) = node
        .request(
            "POST",
            "/schemas/validate?schema_name=task_v1",
            Some(json!({"title": "x", "reward": 1})),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(validated["description"], "");

    let (status, _) = node
        .request("POST", "/schemas/validate?schema_name=task_v1", Some(json!({"reward": 1})))
        .await;
    assert_eq!(status, 400);

    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_tool_execution_is_403() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;
    let now = Timestamp::now();
    let caller = node.node_id.clone();

    // Seed an active tool and a task that does not require it
    node.services
        .store
        .with_write(|state| {
            let key = synapse_crypto::derive_channel_key(&ChannelId::global());
            let channel = state.channel_entry(&ChannelId::global());
            channel.common_tools.insert(ToolId::new("stripe"), CommonTool {
                tool_id: ToolId::new("stripe"),
                kind: ToolKind::ApiKey,
                description: String::new(),
                status: ToolStatus::Active,
                monthly_cost_sp: 10,
                last_payment_at: now,
                encrypted_credentials: synapse_crypto::encrypt(&key, b"{\"endpoint\":\"https://api\"}").unwrap(),
                created_at: now,
                updated_at: now,
            });
            channel.tasks.insert(TaskId::new("t1"), Task {
                id: TaskId::new("t1"),
                schema_name: "task_v2".to_string(),
                title: "no tools needed".to_string(),
                description: String::new(),
                tags: vec![],
                status: TaskStatus::InProgress,
                creator: caller.clone(),
                assignee: Some(caller.clone()),
                reward: 10,
                required_tools: vec![],
                auction: None,
                bids: Default::default(),
                created_at: now,
                updated_at: now,
                completed_at: None,
            });
        })
        .await
        .unwrap();

    let (status, _) = node
        .request(
            "POST",
            "/tools/stripe/execute?channel=global&task_id=t1",
            Some(json!({"query": "ping"})),
        )
        .await;
    assert_eq!(status, 403);

    // Unknown tool is also an opaque 403
    let (status, _) = node
        .request(
            "POST",
            "/tools/ghost/execute?channel=global&task_id=t1",
            Some(json!({})),
        )
        .await;
    assert_eq!(status, 403);

    node.shutdown.trigger();
}

// All mutations require node signature on the request body; absent headers
// are rejected, including on close and ratify.
#[tokio::test(flavor = "multi_thread")]
async fn unsigned_mutations_are_403() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;

    let (status, body) = node
        .request_unsigned(
            "POST",
            "/tasks?channel=global",
            Some(json!({"title": "unsigned", "reward": 1})),
        )
        .await;
    assert_eq!(status, 403);
    assert!(body["error"].as_str().unwrap().contains("signature"));

    let (status, _) = node
        .request_unsigned("POST", "/proposals/prop_x/close?channel=global", Some(json!({})))
        .await;
    assert_eq!(status, 403);
    let (status, _) = node
        .request_unsigned("POST", "/governance/ratify/prop_x?channel=global", Some(json!({})))
        .await;
    assert_eq!(status, 403);
    let (status, _) = node.request_unsigned("POST", "/channels/dev/subscribe", None).await;
    assert_eq!(status, 403);

    // Reads stay open
    let (status, _) = node.request_unsigned("GET", "/state", None).await;
    assert_eq!(status, 200);

    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_signature_headers_are_403() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/tasks?channel=global")
        .header("content-type", "application/json")
        .header("x-synapse-public-key", "deadbeef")
        .header("x-synapse-signature", "deadbeef")
        .body(axum::body::Body::from(
            serde_json::to_vec(&json!({"title": "x", "reward": 1})).unwrap(),
        ))
        .unwrap();
    let response = tower::ServiceExt::oneshot(node.router.clone(), request).await.unwrap();
    assert_eq!(response.status().as_u16(), 403);

    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_subscription_endpoints() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;

    let (status, _) = node.request("POST", "/channels/dev/subscribe", None).await;
    assert_eq!(status, 200);
    let (_, state) = node.request("GET", "/state", None).await;
    let subscribed: Vec<String> =
        serde_json::from_value(state["nodes"][node.node_id.as_str()]["subscribed_channels"].clone()).unwrap();
    assert!(subscribed.contains(&"dev".to_string()));

    let (status, _) = node.request("POST", "/channels/global/unsubscribe", None).await;
    assert_eq!(status, 400);
    let (status, _) = node.request("POST", "/channels/dev/unsubscribe", None).await;
    assert_eq!(status, 200);

    node.shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread")]
async fn validator_listing_reflects_reputation() {
    let hub = LoopbackHub::new();
    let node = spawn_node(&hub, NetworkConfig::default()).await;
    let (status, body) = node.request("GET", "/validators", None).await;
    assert_eq!(status, 200);
    let validators: Vec<NodeId> = serde_json::from_value(body["validators"].clone()).unwrap();
    assert_eq!(validators, vec![node.node_id.clone()]);
    assert_eq!(body["majority_threshold"], 1);
    node.shutdown.trigger();
}
