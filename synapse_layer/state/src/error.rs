// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::io;

use synapse_common_types::optional::IsNotFoundError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to encode state snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("State snapshot is corrupt: {0}")]
    CorruptSnapshot(#[source] serde_json::Error),
    #[error("Channel not found: {channel}")]
    ChannelNotFound { channel: String },
}

impl IsNotFoundError for StorageError {
    fn is_not_found_error(&self) -> bool {
        matches!(self, StorageError::ChannelNotFound { .. })
    }
}
