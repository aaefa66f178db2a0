// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use serde::{Deserialize, Serialize};
use synapse_common_types::{serde_with, Timestamp, ToolId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ApiKey,
    OauthToken,
    Webhook,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Active,
    InactiveFundingIssue,
    /// Terminal: payments stop, credentials are retained for audit.
    Deprecated,
}

/// A shared credentialed resource owned by a channel and funded by its
/// treasury. Credentials are AEAD-encrypted under the channel key; the
/// plaintext exists only transiently during authorized execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommonTool {
    pub tool_id: ToolId,
    #[serde(rename = "type")]
    pub kind: ToolKind,
    #[serde(default)]
    pub description: String,
    pub status: ToolStatus,
    pub monthly_cost_sp: u64,
    pub last_payment_at: Timestamp,
    #[serde(with = "serde_with::base64")]
    pub encrypted_credentials: Vec<u8>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl CommonTool {
    pub fn is_active(&self) -> bool {
        self.status == ToolStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_status_wire_format() {
        assert_eq!(serde_json::to_string(&ToolKind::ApiKey).unwrap(), "\"api_key\"");
        assert_eq!(
            serde_json::to_string(&ToolStatus::InactiveFundingIssue).unwrap(),
            "\"inactive_funding_issue\""
        );
    }

    #[test]
    fn credentials_render_as_base64() {
        let tool = CommonTool {
            tool_id: ToolId::new("stripe"),
            kind: ToolKind::ApiKey,
            description: String::new(),
            status: ToolStatus::Active,
            monthly_cost_sp: 50,
            last_payment_at: Timestamp::now(),
            encrypted_credentials: vec![1, 2, 3, 4],
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        };
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["encrypted_credentials"], "AQIDBA==");
        assert_eq!(json["type"], "api_key");
    }
}
