// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Thin typed client for the node's HTTP API. Every mutation must carry a
//! node signature over the request body; configure a keypair with
//! [`SynapseNodeClient::with_keypair`] and the client signs each call. A
//! client without a keypair can only use the read endpoints.

use std::sync::Arc;

use anyhow::anyhow;
use serde::Deserialize;
use serde_json::{json, Value};
use synapse_common_types::NodeId;
use synapse_crypto::SynapseKeypair;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeIdentity {
    pub node_id: NodeId,
    pub public_key: String,
}

#[derive(Debug, Clone)]
pub struct SynapseNodeClient {
    client: reqwest::Client,
    endpoint: String,
    keypair: Option<Arc<SynapseKeypair>>,
}

impl SynapseNodeClient {
    pub fn connect<T: Into<String>>(endpoint: T) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            keypair: None,
        }
    }

    /// The identity that signs every mutating request.
    pub fn with_keypair(mut self, keypair: Arc<SynapseKeypair>) -> Self {
        self.keypair = Some(keypair);
        self
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let response = self.client.get(format!("{}{}", self.endpoint, path)).send().await?;
        read_json(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        // The signature covers the exact bytes on the wire
        let bytes = serde_json::to_vec(body)?;
        let mut request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header("content-type", "application/json");
        if let Some(keypair) = &self.keypair {
            let signature = keypair.sign(&bytes);
            request = request
                .header("x-synapse-public-key", hex::encode(keypair.public_key_bytes()))
                .header("x-synapse-signature", hex::encode(signature.to_bytes()));
        }
        read_json(request.body(bytes).send().await?).await
    }

    pub async fn get_identity(&self) -> anyhow::Result<NodeIdentity> {
        let value = self.get("/whoami").await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_state(&self) -> anyhow::Result<Value> {
        self.get("/state").await
    }

    pub async fn get_health(&self) -> anyhow::Result<Value> {
        self.get("/health").await
    }

    pub async fn get_peers(&self) -> anyhow::Result<Value> {
        self.get("/peers").await
    }

    pub async fn get_validators(&self) -> anyhow::Result<Value> {
        self.get("/validators").await
    }

    pub async fn get_commands(&self) -> anyhow::Result<Value> {
        self.get("/commands").await
    }

    pub async fn create_task(&self, channel: &str, body: Value) -> anyhow::Result<Value> {
        self.post(&format!("/tasks?channel={}", channel), &body).await
    }

    pub async fn claim_task(&self, channel: &str, task_id: &str) -> anyhow::Result<Value> {
        self.post(&format!("/tasks/{}/claim?channel={}", task_id, channel), &json!({}))
            .await
    }

    pub async fn progress_task(&self, channel: &str, task_id: &str) -> anyhow::Result<Value> {
        self.post(&format!("/tasks/{}/progress?channel={}", task_id, channel), &json!({}))
            .await
    }

    pub async fn complete_task(&self, channel: &str, task_id: &str) -> anyhow::Result<Value> {
        self.post(&format!("/tasks/{}/complete?channel={}", task_id, channel), &json!({}))
            .await
    }

    pub async fn bid_on_task(
        &self,
        channel: &str,
        task_id: &str,
        amount_sp: u64,
        estimated_days: u32,
    ) -> anyhow::Result<Value> {
        self.post(
            &format!("/tasks/{}/bid?channel={}", task_id, channel),
            &json!({ "amount_sp": amount_sp, "estimated_days": estimated_days }),
        )
        .await
    }

    pub async fn create_proposal(&self, channel: &str, body: Value) -> anyhow::Result<Value> {
        self.post(&format!("/proposals?channel={}", channel), &body).await
    }

    pub async fn vote(&self, channel: &str, proposal_id: &str, choice: &str) -> anyhow::Result<Value> {
        self.post(
            &format!("/proposals/{}/vote?channel={}", proposal_id, channel),
            &json!({ "choice": choice }),
        )
        .await
    }

    pub async fn close_proposal(&self, channel: &str, proposal_id: &str) -> anyhow::Result<Value> {
        self.post(&format!("/proposals/{}/close?channel={}", proposal_id, channel), &json!({}))
            .await
    }

    pub async fn ratify(&self, channel: &str, proposal_id: &str) -> anyhow::Result<Value> {
        self.post(&format!("/governance/ratify/{}?channel={}", proposal_id, channel), &json!({}))
            .await
    }

    pub async fn execute_tool(
        &self,
        channel: &str,
        tool_id: &str,
        task_id: &str,
        body: Value,
    ) -> anyhow::Result<Value> {
        self.post(
            &format!("/tools/{}/execute?channel={}&task_id={}", tool_id, channel, task_id),
            &body,
        )
        .await
    }

    pub async fn validate_schema(&self, schema_name: &str, body: Value) -> anyhow::Result<Value> {
        self.post(&format!("/schemas/validate?schema_name={}", schema_name), &body)
            .await
    }

    pub async fn subscribe_channel(&self, channel: &str) -> anyhow::Result<Value> {
        self.post(&format!("/channels/{}/subscribe", channel), &json!({})).await
    }

    pub async fn unsubscribe_channel(&self, channel: &str) -> anyhow::Result<Value> {
        self.post(&format!("/channels/{}/unsubscribe", channel), &json!({})).await
    }
}

async fn read_json(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(anyhow!("request failed with {}: {}", status, reason));
    }
    Ok(body)
}
