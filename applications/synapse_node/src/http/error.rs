// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use synapse_engine::{governance::GovernanceError, tasks::TaskError, tools::ToolError};
use synapse_state::{schema::SchemaError, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Governance(#[from] GovernanceError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Request signature rejected: {0}")]
    BadSignature(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Schema(SchemaError::UnknownSchema { .. }) => StatusCode::NOT_FOUND,
            ApiError::Schema(_) => StatusCode::BAD_REQUEST,
            ApiError::Task(e) => match e {
                TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
                TaskError::Forbidden { .. } => StatusCode::FORBIDDEN,
                TaskError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                TaskError::InvalidStatus { .. } => StatusCode::CONFLICT,
                TaskError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            },
            ApiError::Governance(e) => match e {
                GovernanceError::ProposalNotFound { .. } => StatusCode::NOT_FOUND,
                GovernanceError::NotValidator { .. } => StatusCode::FORBIDDEN,
                GovernanceError::VotingStillOpen { .. }
                | GovernanceError::NotOpen
                | GovernanceError::NotPendingRatification => StatusCode::CONFLICT,
                GovernanceError::InvalidOperation { .. } | GovernanceError::InvalidBody { .. } => {
                    StatusCode::BAD_REQUEST
                },
            },
            ApiError::Tool(e) => match e {
                ToolError::NotFound { .. } => StatusCode::NOT_FOUND,
                ToolError::Forbidden { .. } => StatusCode::FORBIDDEN,
                ToolError::Decrypt(_) | ToolError::CredentialFormat => StatusCode::INTERNAL_SERVER_ERROR,
                ToolError::Http(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadSignature(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
