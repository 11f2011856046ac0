// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Record lifecycle transitions
//!
//! Rows move ACTIVE -> PACKED while an uplink message is assembled, then
//! either PACKED -> SENT together with `node_index = node_stage` on
//! success, or PACKED -> ACTIVE together with `node_stage = node_index`
//! on failure. Each bulk transition runs in one transaction.

use floatbot::RecordState;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::{Result, StoreError};
use crate::models::TransitionCounts;
use crate::store::RecordStore;

fn transition_error(
    tx: &Transaction<'_>,
    table: &'static str,
    id: i64,
    expected: RecordState,
) -> Result<StoreError> {
    let sql = format!("SELECT state FROM {} WHERE id = ?1", table);
    let found: Option<u8> = tx
        .query_row(&sql, params![id], |row| row.get(0))
        .optional()?;
    Ok(match found {
        None => StoreError::NotFound { table, id },
        Some(_) => StoreError::InvalidTransition {
            table,
            id,
            expected: expected.name(),
        },
    })
}

impl RecordStore {
    /// Mark an ACTIVE status row as PACKED
    pub fn mark_status_packed(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE status SET state = ?2 WHERE id = ?1 AND state = ?3",
            params![id, RecordState::Packed as u8, RecordState::Active as u8],
        )?;
        if changed == 0 {
            return Err(transition_error(&tx, "status", id, RecordState::Active)?);
        }
        tx.commit()?;
        log::debug!("status {} packed", id);
        Ok(())
    }

    /// Mark an ACTIVE data row as PACKED with `sequence` and stage its node
    ///
    /// The node's `node_stage` becomes `sequence`, which callers take from
    /// [`NodeCounter::next_sequence`](crate::NodeCounter::next_sequence).
    pub fn mark_data_packed(
        &mut self,
        id: i64,
        node_type: &str,
        instance: u32,
        sequence: u32,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE data SET state = ?2, sequence = ?3 WHERE id = ?1 AND state = ?4",
            params![
                id,
                RecordState::Packed as u8,
                sequence,
                RecordState::Active as u8
            ],
        )?;
        if changed == 0 {
            return Err(transition_error(&tx, "data", id, RecordState::Active)?);
        }

        let staged = tx.execute(
            "UPDATE node SET node_stage = ?3 WHERE node_type = ?1 AND instance = ?2",
            params![node_type, instance, sequence],
        )?;
        if staged == 0 {
            return Err(StoreError::UnknownNodeType(format!(
                "{}{}",
                node_type, instance
            )));
        }

        tx.commit()?;
        log::debug!(
            "data {} packed as {}{} seq {}",
            id,
            node_type,
            instance,
            sequence
        );
        Ok(())
    }

    /// Confirm every PACKED row as SENT and advance node indices
    pub fn commit_cycle(&mut self) -> Result<TransitionCounts> {
        let tx = self.conn.transaction()?;
        let packed = RecordState::Packed as u8;
        let sent = RecordState::Sent as u8;

        let counts = TransitionCounts {
            status: tx.execute(
                "UPDATE status SET state = ?1 WHERE state = ?2",
                params![sent, packed],
            )?,
            data: tx.execute(
                "UPDATE data SET state = ?1 WHERE state = ?2",
                params![sent, packed],
            )?,
            nodes: tx.execute(
                "UPDATE node SET node_index = node_stage WHERE node_index != node_stage",
                [],
            )?,
        };

        tx.commit()?;
        log::info!(
            "committed cycle: {} status, {} data, {} nodes",
            counts.status,
            counts.data,
            counts.nodes
        );
        Ok(counts)
    }

    /// Return every PACKED row to ACTIVE and rewind node stages
    pub fn rollback_cycle(&mut self) -> Result<TransitionCounts> {
        let tx = self.conn.transaction()?;
        let packed = RecordState::Packed as u8;
        let active = RecordState::Active as u8;

        let counts = TransitionCounts {
            status: tx.execute(
                "UPDATE status SET state = ?1 WHERE state = ?2",
                params![active, packed],
            )?,
            data: tx.execute(
                "UPDATE data SET state = ?1, sequence = NULL WHERE state = ?2",
                params![active, packed],
            )?,
            nodes: tx.execute(
                "UPDATE node SET node_stage = node_index WHERE node_stage != node_index",
                [],
            )?,
        };

        tx.commit()?;
        if counts != TransitionCounts::default() {
            log::warn!(
                "rolled back cycle: {} status, {} data, {} nodes",
                counts.status,
                counts.data,
                counts.nodes
            );
        }
        Ok(counts)
    }
}
