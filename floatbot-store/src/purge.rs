// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Periodic deletion of rows that no longer need to be kept
//!
//! PACKED rows are never touched here.

use floatbot::RecordState;
use rusqlite::params;

use crate::error::Result;
use crate::models::PurgeReport;
use crate::store::RecordStore;

/// Five days
pub const DEFAULT_RETENTION_SECS: f64 = 5.0 * 24.0 * 3600.0;

/// Default rating below which ACTIVE data is dropped
pub const DEFAULT_PURGE_RATING: f64 = 0.05;

/// What a purge pass removes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurgePolicy {
    /// Delete SENT rows
    pub delete_sent: bool,
    /// ACTIVE data rated below this is deleted
    pub purge_rating: f64,
    /// Unsent rows whose source timestamp is older than this are deleted
    pub retention_secs: f64,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            delete_sent: true,
            purge_rating: DEFAULT_PURGE_RATING,
            retention_secs: DEFAULT_RETENTION_SECS,
        }
    }
}

impl RecordStore {
    /// Apply `policy` at epoch time `now`
    pub fn purge(&mut self, policy: &PurgePolicy, now: f64) -> Result<PurgeReport> {
        let tx = self.conn.transaction()?;
        let packed = RecordState::Packed as u8;
        let mut report = PurgeReport::default();

        if policy.delete_sent {
            let sent = RecordState::Sent as u8;
            report.sent_data = tx.execute("DELETE FROM data WHERE state = ?1", params![sent])?;
            report.sent_status = tx.execute(
                "DELETE FROM status WHERE state = ?1
                 AND NOT EXISTS (SELECT 1 FROM data WHERE data.status_id = status.id)",
                params![sent],
            )?;
        }

        report.low_rating = tx.execute(
            "DELETE FROM data WHERE state = ?1 AND pipo_rating < ?2",
            params![RecordState::Active as u8, policy.purge_rating],
        )?;

        let cutoff = now - policy.retention_secs;
        report.expired_data = tx.execute(
            "DELETE FROM data WHERE state != ?1 AND timestamp < ?2",
            params![packed, cutoff],
        )?;
        report.expired_status = tx.execute(
            "DELETE FROM status WHERE state != ?1 AND timestamp < ?2
             AND NOT EXISTS (SELECT 1 FROM data WHERE data.status_id = status.id)",
            params![packed, cutoff],
        )?;

        report.orphaned_data = tx.execute(
            "DELETE FROM data WHERE state != ?1
             AND NOT EXISTS (SELECT 1 FROM status WHERE status.id = data.status_id)",
            params![packed],
        )?;

        tx.commit()?;
        if report.total() > 0 {
            log::info!(
                "purged {} rows (sent {}/{}, low rating {}, expired {}/{}, orphaned {})",
                report.total(),
                report.sent_status,
                report.sent_data,
                report.low_rating,
                report.expired_status,
                report.expired_data,
                report.orphaned_data
            );
        }
        Ok(report)
    }
}
