// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Error types for the agent

use std::path::PathBuf;

use floatbot::{EncodeError, PipoError};
use floatbot_store::StoreError;
use thiserror::Error;

/// Errors that end or degrade a cycle
#[derive(Error, Debug)]
pub enum AgentError {
    /// Record store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration file could not be read or written
    #[error("Config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration content is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Priority engine rejected the configuration
    #[error("PIPO error: {0}")]
    Pipo(#[from] PipoError),

    /// Filesystem failure outside a single data folder
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Reasons a status or data product could not be ingested
#[derive(Error, Debug)]
pub enum IngestError {
    /// File unreadable or missing
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not the expected JSON shape
    #[error("Malformed {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A field is present but unusable
    #[error("Bad {field} in {path}: {reason}")]
    Format {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },

    /// Status or payload cannot be carried by its segment
    #[error("Unencodable record in {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: EncodeError,
    },

    /// Store rejected the record
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(
        path: impl Into<PathBuf>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        IngestError::Format {
            path: path.into(),
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestError::format("/data/f1/cam_meta.json", "node_type", "empty");
        assert_eq!(
            err.to_string(),
            "Bad node_type in /data/f1/cam_meta.json: empty"
        );

        let err = AgentError::InvalidConfig("max_msg_size must exceed header_reserve".into());
        assert!(err.to_string().contains("max_msg_size"));
    }

    #[test]
    fn test_from_store_error() {
        let err: IngestError = StoreError::UnknownNodeType("zzz".to_string()).into();
        assert!(matches!(err, IngestError::Store(_)));
    }
}
