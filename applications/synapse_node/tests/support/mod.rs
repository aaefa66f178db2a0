// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! In-process node fixture: real services wired over the loopback hub.

use std::sync::Arc;

use axum::{body::Body, http::Request, Router};
use serde_json::Value;
use synapse_common_types::{shutdown::Shutdown, NodeId, Timestamp};
use synapse_crypto::SynapseKeypair;
use synapse_node::{
    bootstrap::{spawn_services, Services},
    config::ApplicationConfig,
    http::{build_router, ApiContext},
    p2p::LoopbackHub,
};
use synapse_state::{models::NetworkConfig, StateStore};
use tower::ServiceExt;

pub struct TestNode {
    pub node_id: NodeId,
    pub services: Services,
    pub router: Router,
    pub shutdown: Shutdown,
    _data_dir: tempfile::TempDir,
}

pub async fn spawn_node(hub: &Arc<LoopbackHub>, network: NetworkConfig) -> TestNode {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let keypair = SynapseKeypair::generate();
    let node_id = keypair.node_id().clone();
    let store = StateStore::initialize(data_dir.path(), &node_id, network.clone()).expect("state store");

    let mut config = ApplicationConfig::default();
    config.base_path = data_dir.path().to_path_buf();
    config.network = network;

    let (transport, rx_inbound) = hub.connect();
    let shutdown = Shutdown::new();
    let services = spawn_services(
        &config,
        keypair,
        store,
        Arc::new(transport),
        rx_inbound,
        shutdown.to_signal(),
    )
    .await
    .expect("services spawn");

    let context = Arc::new(ApiContext {
        keypair: services.keypair.clone(),
        store: services.store.clone(),
        gossip: services.gossip.clone(),
        executor: services.executor.clone(),
        started_at: Timestamp::now(),
    });
    let router = build_router(context);

    TestNode {
        node_id,
        services,
        router,
        shutdown,
        _data_dir: data_dir,
    }
}

impl TestNode {
    /// Sends a request signed with this node's own identity, the way every
    /// mutation must arrive.
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
        let bytes = body
            .map(|value| serde_json::to_vec(&value).unwrap())
            .unwrap_or_default();
        let keypair = &self.services.keypair;
        let signature = keypair.sign(&bytes);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-synapse-public-key", hex::encode(keypair.public_key_bytes()))
            .header("x-synapse-signature", hex::encode(signature.to_bytes()))
            .body(Body::from(bytes))
            .expect("request builds");
        self.dispatch(request).await
    }

    /// Sends a request without signature headers; mutations must reject it.
    pub async fn request_unsigned(&self, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(value) => request.body(Body::from(serde_json::to_vec(&value).unwrap())),
            None => request.body(Body::empty()),
        }
        .expect("request builds");
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> (u16, Value) {
        let response = self.router.clone().oneshot(request).await.expect("router response");
        let status = response.status().as_u16();
        let bytes = hyper::body::to_bytes(response.into_body()).await.expect("body bytes");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

/// Polls `check` until it returns true or ~5 seconds elapse.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    false
}
