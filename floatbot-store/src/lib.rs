// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! # floatbot-store
//!
//! SQLite record store for the floatbot agent.
//!
//! Status reports and data products are kept as rows that move through
//! ACTIVE, PACKED and SENT. Per-node counters give every uplinked data
//! product a sequence number that only advances once the uplink is
//! confirmed.
//!
//! ```
//! use floatbot::StatusReport;
//! use floatbot_store::{RecordStore, RecordState};
//!
//! let mut store = RecordStore::open_in_memory()?;
//! let id = store.insert_status(&StatusReport::default())?;
//! store.mark_status_packed(id)?;
//! store.rollback_cycle()?;
//! assert_eq!(store.status_by_id(id)?.unwrap().state, RecordState::Active);
//! # Ok::<(), floatbot_store::StoreError>(())
//! ```

mod cycle;
pub mod error;
mod migrations;
pub mod models;
mod purge;
mod store;

pub use error::{Result, StoreError};
pub use floatbot::RecordState;
pub use models::{
    DataProduct, DataRecord, NodeCounter, PurgeReport, RatingRow, RatingUpdate, StateCounts,
    StatusRecord, StoreCounts, TransitionCounts,
};
pub use purge::{PurgePolicy, DEFAULT_PURGE_RATING, DEFAULT_RETENTION_SECS};
pub use store::RecordStore;
