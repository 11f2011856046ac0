// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! # floatbot-agent
//!
//! The batch agent that moves Float data folders into the record store,
//! ranks them and uplinks the best of them in one size-bounded message
//! per run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use floatbot::MemoryChannel;
//! use floatbot_agent::{AgentConfig, ConfigStore, Orchestrator};
//! use floatbot_store::RecordStore;
//!
//! let config = ConfigStore::in_memory(AgentConfig::default())?;
//! let store = RecordStore::open(&config.config().db_path)?;
//! let mut agent = Orchestrator::new(store, config, MemoryChannel::new());
//!
//! let report = agent.run_cycle(floatbot_agent::now_epoch())?;
//! println!("send ok: {}", report.send_ok());
//! # Ok::<(), floatbot_agent::AgentError>(())
//! ```

pub mod config;
pub mod error;
pub mod inbox;
pub mod ingest;
pub mod link;
pub mod orchestrator;

pub use config::{AgentConfig, ConfigStore, CycleConfig, LinkConfig, WeightsConfig};
pub use error::{AgentError, IngestError, Result};
pub use inbox::{handle_downlink, Disposition, Inbox};
pub use ingest::{IngestOutcome, IngestSummary, Ingestor};
pub use link::UdpLink;
pub use orchestrator::{CycleReport, Orchestrator, PackSummary, SendOutcome};

/// Current time as fractional epoch seconds
pub fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
