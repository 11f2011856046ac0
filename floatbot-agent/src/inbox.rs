// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Inbound message handling

use std::fs;
use std::path::{Path, PathBuf};

use floatbot::{DownlinkMessage, Routing, SegmentKind};
use serde_json::{Map, Value};

use crate::config::ConfigStore;

/// What was done with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Configuration applied to the agent; identifiers changed
    Applied(Vec<String>),
    /// Written to the device inbox
    Delivered(PathBuf),
    /// Malformed or unusable; logged and dropped
    Skipped(String),
}

/// Per-device drop folder for downlink messages
#[derive(Debug, Clone)]
pub struct Inbox {
    dir: PathBuf,
}

impl Inbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name a message is delivered under
    pub fn file_name(message: &DownlinkMessage) -> String {
        let prefix = match message.kind {
            SegmentKind::Config => "cfg",
            _ => "gen",
        };
        format!("{}_msg_{:010}.json", prefix, message.comm_index)
    }

    /// Write the message body as a JSON file
    pub fn deliver(&self, message: &DownlinkMessage) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(message));
        fs::write(&path, &message.body)?;
        Ok(path)
    }
}

fn parse_body(message: &DownlinkMessage) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(&message.body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("body is not a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Decode and dispatch one raw inbound message
pub fn handle_downlink(raw: &[u8], config: &mut ConfigStore, inbox: &Inbox) -> Disposition {
    let message = match DownlinkMessage::from_bytes(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("dropping inbound message ({} bytes): {}", raw.len(), e);
            return Disposition::Skipped(e.to_string());
        }
    };

    let body = match parse_body(&message) {
        Ok(body) => body,
        Err(reason) => {
            tracing::warn!("dropping inbound message {}: {}", message.comm_index, reason);
            return Disposition::Skipped(reason);
        }
    };

    if message.routing == Routing::Agent && message.kind == SegmentKind::Config {
        return match config.apply_updates(&body) {
            Ok(applied) => {
                tracing::info!(
                    "applied config message {}: {}",
                    message.comm_index,
                    applied.join(", ")
                );
                Disposition::Applied(applied)
            }
            Err(e) => {
                tracing::warn!("config message {} rejected: {}", message.comm_index, e);
                Disposition::Skipped(e.to_string())
            }
        };
    }

    match inbox.deliver(&message) {
        Ok(path) => {
            tracing::info!("delivered message {} to {}", message.comm_index, path.display());
            Disposition::Delivered(path)
        }
        Err(e) => {
            tracing::error!("cannot deliver message {}: {}", message.comm_index, e);
            Disposition::Skipped(e.to_string())
        }
    }
}
