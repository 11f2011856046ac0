// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! SQLite-backed record store
//!
//! One [`RecordStore`] owns the single connection for a cycle. Inserts and
//! queries live here; lifecycle transitions are in `cycle.rs` and purging
//! in `purge.rs`.

use std::path::Path;

use floatbot::{ConfigIndices, DataType, Payload, RecordState, StatusReport};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, StoreError};
use crate::migrations::run_migrations;
use crate::models::{
    DataProduct, DataRecord, NodeCounter, RatingRow, RatingUpdate, StateCounts, StatusRecord,
    StoreCounts,
};

const STATUS_COLUMNS: &str = "id, state, timestamp, latitude, longitude, heading, battery, \
     bus_voltage, temperature, pitch, roll, wake_event_type, wake_event_id, wake_count, \
     task_index, trigger_index, rule_index, sensor_index, node_index, geofence_index, flags";

const DATA_COLUMNS: &str = "id, state, sequence, status_id, node_type, instance, node_code, \
     timestamp, heading, quality, node_id_score, trigger_score, normalized_size, numerator, \
     pipo_rating, uplink_eligible, change_eligible, use_change, std_dtype, std_rows, std_cols, \
     std_values, std_size, chg_dtype, chg_rows, chg_cols, chg_values, chg_size, meta_path";

fn conversion_error(column: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, reason.into())
}

fn state_from_row(row: &Row, column: &str) -> rusqlite::Result<RecordState> {
    let raw: u8 = row.get(column)?;
    RecordState::from_u8(raw).ok_or_else(|| conversion_error(1, format!("bad state {}", raw)))
}

fn values_to_json(values: &[f64]) -> Result<String> {
    serde_json::to_string(values).map_err(|e| StoreError::Corrupt {
        column: "values",
        id: 0,
        reason: e.to_string(),
    })
}

fn payload_from_row(
    row: &Row,
    dtype_col: &str,
    rows_col: &str,
    cols_col: &str,
    values_col: &str,
) -> rusqlite::Result<Option<Payload>> {
    let dtype: Option<String> = row.get(dtype_col)?;
    let Some(dtype) = dtype else {
        return Ok(None);
    };
    let dtype = DataType::from_name(&dtype)
        .ok_or_else(|| conversion_error(0, format!("unknown data type {}", dtype)))?;
    let values: String = row.get(values_col)?;
    let values: Vec<f64> =
        serde_json::from_str(&values).map_err(|e| conversion_error(0, e.to_string()))?;

    Ok(Some(Payload::with_shape(
        dtype,
        row.get(rows_col)?,
        row.get(cols_col)?,
        values,
    )))
}

fn row_to_status(row: &Row) -> rusqlite::Result<StatusRecord> {
    Ok(StatusRecord {
        id: row.get("id")?,
        state: state_from_row(row, "state")?,
        report: StatusReport {
            timestamp: row.get("timestamp")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            heading: row.get("heading")?,
            battery: row.get("battery")?,
            bus_voltage: row.get("bus_voltage")?,
            temperature: row.get("temperature")?,
            pitch: row.get("pitch")?,
            roll: row.get("roll")?,
            wake_event_type: row.get("wake_event_type")?,
            wake_event_id: row.get("wake_event_id")?,
            wake_count: row.get("wake_count")?,
            indices: ConfigIndices {
                task: row.get("task_index")?,
                trigger: row.get("trigger_index")?,
                rule: row.get("rule_index")?,
                sensor: row.get("sensor_index")?,
                node: row.get("node_index")?,
                geofence: row.get("geofence_index")?,
            },
            flags: row.get("flags")?,
        },
    })
}

fn row_to_data(row: &Row) -> rusqlite::Result<DataRecord> {
    let standard = payload_from_row(row, "std_dtype", "std_rows", "std_cols", "std_values")?
        .ok_or_else(|| conversion_error(0, "missing standard payload".to_string()))?;

    Ok(DataRecord {
        id: row.get("id")?,
        state: state_from_row(row, "state")?,
        sequence: row.get("sequence")?,
        product: DataProduct {
            status_id: row.get("status_id")?,
            node_type: row.get("node_type")?,
            instance: row.get("instance")?,
            node_code: row.get("node_code")?,
            timestamp: row.get("timestamp")?,
            heading: row.get("heading")?,
            quality: row.get("quality")?,
            node_id_score: row.get("node_id_score")?,
            trigger_score: row.get("trigger_score")?,
            normalized_size: row.get("normalized_size")?,
            numerator: row.get("numerator")?,
            pipo_rating: row.get("pipo_rating")?,
            uplink_eligible: row.get("uplink_eligible")?,
            change_eligible: row.get("change_eligible")?,
            use_change: row.get("use_change")?,
            standard,
            change: payload_from_row(row, "chg_dtype", "chg_rows", "chg_cols", "chg_values")?,
            standard_size: row.get("std_size")?,
            change_size: row.get("chg_size")?,
            meta_path: row.get("meta_path")?,
        },
    })
}

fn row_to_node(row: &Row) -> rusqlite::Result<NodeCounter> {
    Ok(NodeCounter {
        node_type: row.get("node_type")?,
        instance: row.get("instance")?,
        code: row.get("code")?,
        index: row.get("node_index")?,
        stage: row.get("node_stage")?,
    })
}

/// Persistent store of status, data and node rows
#[derive(Debug)]
pub struct RecordStore {
    pub(crate) conn: Connection,
}

impl RecordStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    /// Insert a status report as ACTIVE, returning its row id
    pub fn insert_status(&mut self, report: &StatusReport) -> Result<i64> {
        let ix = &report.indices;
        self.conn.execute(
            "INSERT INTO status (
                state, timestamp, latitude, longitude, heading, battery, bus_voltage,
                temperature, pitch, roll, wake_event_type, wake_event_id, wake_count,
                task_index, trigger_index, rule_index, sensor_index, node_index,
                geofence_index, flags
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                RecordState::Active as u8,
                report.timestamp,
                report.latitude,
                report.longitude,
                report.heading,
                report.battery,
                report.bus_voltage,
                report.temperature,
                report.pitch,
                report.roll,
                report.wake_event_type,
                report.wake_event_id,
                report.wake_count,
                ix.task,
                ix.trigger,
                ix.rule,
                ix.sensor,
                ix.node,
                ix.geofence,
                report.flags,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        log::debug!("inserted status {}", id);
        Ok(id)
    }

    /// Insert a data product as ACTIVE, returning its row id
    pub fn insert_data(&mut self, product: &DataProduct) -> Result<i64> {
        let std_values = values_to_json(&product.standard.values)?;
        let chg_values = product
            .change
            .as_ref()
            .map(|c| values_to_json(&c.values))
            .transpose()?;
        let chg = product.change.as_ref();

        self.conn.execute(
            "INSERT INTO data (
                state, status_id, node_type, instance, node_code, timestamp, heading,
                quality, node_id_score, trigger_score, normalized_size, numerator,
                pipo_rating, uplink_eligible, change_eligible, use_change,
                std_dtype, std_rows, std_cols, std_values, std_size,
                chg_dtype, chg_rows, chg_cols, chg_values, chg_size, meta_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
            params![
                RecordState::Active as u8,
                product.status_id,
                product.node_type,
                product.instance,
                product.node_code,
                product.timestamp,
                product.heading,
                product.quality,
                product.node_id_score,
                product.trigger_score,
                product.normalized_size,
                product.numerator,
                product.pipo_rating,
                product.uplink_eligible,
                product.change_eligible,
                product.use_change,
                product.standard.dtype.name(),
                product.standard.rows,
                product.standard.cols,
                std_values,
                product.standard_size,
                chg.map(|c| c.dtype.name()),
                chg.map(|c| c.rows),
                chg.map(|c| c.cols),
                chg_values,
                product.change_size,
                product.meta_path,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        log::debug!(
            "inserted data {} ({}{} rating {:.4})",
            id,
            product.node_type,
            product.instance,
            product.pipo_rating
        );
        Ok(id)
    }

    /// Look up a node counter
    pub fn node(&self, node_type: &str, instance: u32) -> Result<Option<NodeCounter>> {
        let node = self
            .conn
            .query_row(
                "SELECT node_type, instance, code, node_index, node_stage
                 FROM node WHERE node_type = ?1 AND instance = ?2",
                params![node_type, instance],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// Look up a node counter, creating it for a new instance of a known type
    pub fn resolve_node(&mut self, node_type: &str, instance: u32) -> Result<NodeCounter> {
        if let Some(node) = self.node(node_type, instance)? {
            return Ok(node);
        }

        let code: Option<u32> = self
            .conn
            .query_row(
                "SELECT code FROM node WHERE node_type = ?1 ORDER BY instance LIMIT 1",
                params![node_type],
                |row| row.get(0),
            )
            .optional()?;
        let code = code.ok_or_else(|| StoreError::UnknownNodeType(node_type.to_string()))?;

        self.conn.execute(
            "INSERT INTO node (node_type, code, instance, node_index, node_stage)
             VALUES (?1, ?2, ?3, 0, 0)",
            params![node_type, code, instance],
        )?;
        log::info!("registered node {}{} (code {})", node_type, instance, code);

        Ok(NodeCounter {
            node_type: node_type.to_string(),
            instance,
            code,
            index: 0,
            stage: 0,
        })
    }

    /// Status row by id
    pub fn status_by_id(&self, id: i64) -> Result<Option<StatusRecord>> {
        let sql = format!("SELECT {} FROM status WHERE id = ?1", STATUS_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], row_to_status)
            .optional()?)
    }

    /// Data row by id
    pub fn data_by_id(&self, id: i64) -> Result<Option<DataRecord>> {
        let sql = format!("SELECT {} FROM data WHERE id = ?1", DATA_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], row_to_data)
            .optional()?)
    }

    /// Most recent ACTIVE status
    pub fn latest_active_status(&self) -> Result<Option<StatusRecord>> {
        let sql = format!(
            "SELECT {} FROM status WHERE state = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
            STATUS_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![RecordState::Active as u8], row_to_status)
            .optional()?)
    }

    /// Up to `limit` ACTIVE, uplink-eligible data products, best rated first
    pub fn top_active_data(&self, limit: usize) -> Result<Vec<DataRecord>> {
        let sql = format!(
            "SELECT {} FROM data
             WHERE state = ?1 AND uplink_eligible = 1
             ORDER BY pipo_rating DESC, id ASC
             LIMIT ?2",
            DATA_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![RecordState::Active as u8, limit], row_to_data)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Rating inputs of every unsent data product
    pub fn unsent_rating_rows(&self) -> Result<Vec<RatingRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, quality, node_id_score, trigger_score, normalized_size,
                    numerator, pipo_rating, uplink_eligible, change_eligible, std_size, chg_size
             FROM data WHERE state IN (?1, ?2) ORDER BY id",
        )?;
        let rows = stmt.query_map(
            params![RecordState::Active as u8, RecordState::Packed as u8],
            |row| {
                Ok(RatingRow {
                    id: row.get("id")?,
                    timestamp: row.get("timestamp")?,
                    quality: row.get("quality")?,
                    node_id_score: row.get("node_id_score")?,
                    trigger_score: row.get("trigger_score")?,
                    normalized_size: row.get("normalized_size")?,
                    numerator: row.get("numerator")?,
                    pipo_rating: row.get("pipo_rating")?,
                    uplink_eligible: row.get("uplink_eligible")?,
                    change_eligible: row.get("change_eligible")?,
                    standard_size: row.get("std_size")?,
                    change_size: row.get("chg_size")?,
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Store new rating values for one data product
    pub fn update_rating(&mut self, id: i64, update: &RatingUpdate) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE data SET numerator = ?2, normalized_size = ?3, pipo_rating = ?4,
                    uplink_eligible = ?5, use_change = ?6
             WHERE id = ?1",
            params![
                id,
                update.numerator,
                update.normalized_size,
                update.pipo_rating,
                update.uplink_eligible,
                update.use_change,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { table: "data", id });
        }
        Ok(())
    }

    /// Ids of status rows in `state`
    pub fn status_ids_in_state(&self, state: RecordState) -> Result<Vec<i64>> {
        self.ids_in_state("status", state)
    }

    /// Ids of data rows in `state`
    pub fn data_ids_in_state(&self, state: RecordState) -> Result<Vec<i64>> {
        self.ids_in_state("data", state)
    }

    fn ids_in_state(&self, table: &'static str, state: RecordState) -> Result<Vec<i64>> {
        let sql = format!("SELECT id FROM {} WHERE state = ?1 ORDER BY id", table);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![state as u8], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
    }

    /// Row counts per table and state
    pub fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            status: self.state_counts("status")?,
            data: self.state_counts("data")?,
        })
    }

    fn state_counts(&self, table: &'static str) -> Result<StateCounts> {
        let sql = format!("SELECT state, COUNT(*) FROM {} GROUP BY state", table);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut counts = StateCounts::default();
        while let Some(row) = rows.next()? {
            let state: u8 = row.get(0)?;
            let count: usize = row.get(1)?;
            match RecordState::from_u8(state) {
                Some(RecordState::Active) => counts.active = count,
                Some(RecordState::Packed) => counts.packed = count,
                Some(RecordState::Sent) => counts.sent = count,
                None => log::warn!("{} rows with unknown state {}", count, state),
            }
        }
        Ok(counts)
    }

    /// Increment and return the uplink communication index
    pub fn next_comm_index(&mut self) -> Result<u32> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE counters SET value = value + 1 WHERE name = 'comm_index'",
            [],
        )?;
        let value: u32 = tx.query_row(
            "SELECT value FROM counters WHERE name = 'comm_index'",
            [],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(timestamp: f64) -> StatusReport {
        StatusReport {
            timestamp,
            latitude: 10.5,
            longitude: -20.25,
            battery: 80.0,
            wake_event_type: 1,
            indices: ConfigIndices {
                geofence: 3,
                ..Default::default()
            },
            flags: 6,
            ..Default::default()
        }
    }

    fn product(status_id: i64, rating: f64) -> DataProduct {
        DataProduct {
            status_id,
            node_type: "imu".to_string(),
            instance: 0,
            node_code: 3,
            timestamp: 1000.0,
            heading: 12.0,
            quality: 0.9,
            node_id_score: 2.0,
            trigger_score: 1.0,
            normalized_size: 0.5,
            numerator: rating,
            pipo_rating: rating,
            uplink_eligible: true,
            change_eligible: false,
            use_change: false,
            standard: Payload::with_shape(DataType::Int16, 1, 3, vec![-1.0, 0.0, 1.0]),
            change: None,
            standard_size: 21,
            change_size: None,
            meta_path: Some("/data/f1/imu_meta.json".to_string()),
        }
    }

    #[test]
    fn test_status_roundtrip() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let id = store.insert_status(&report(1234.5)).unwrap();
        let record = store.status_by_id(id).unwrap().unwrap();
        assert_eq!(record.state, RecordState::Active);
        assert_eq!(record.report, report(1234.5));
    }

    #[test]
    fn test_data_roundtrip_with_change() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let status = store.insert_status(&report(1.0)).unwrap();
        let mut p = product(status, 2.0);
        p.change = Some(Payload::new(DataType::Float32, vec![0.5]));
        p.change_size = Some(19);
        p.change_eligible = true;

        let id = store.insert_data(&p).unwrap();
        let record = store.data_by_id(id).unwrap().unwrap();
        assert_eq!(record.product, p);
        assert_eq!(record.sequence, None);
    }

    #[test]
    fn test_latest_active_status() {
        let mut store = RecordStore::open_in_memory().unwrap();
        assert!(store.latest_active_status().unwrap().is_none());
        store.insert_status(&report(100.0)).unwrap();
        let newest = store.insert_status(&report(300.0)).unwrap();
        store.insert_status(&report(200.0)).unwrap();
        assert_eq!(store.latest_active_status().unwrap().unwrap().id, newest);
    }

    #[test]
    fn test_top_active_data_ordering() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let status = store.insert_status(&report(1.0)).unwrap();
        for rating in [2.0, 5.0, 1.0, 4.0, 3.0] {
            store.insert_data(&product(status, rating)).unwrap();
        }
        let mut ineligible = product(status, 9.0);
        ineligible.uplink_eligible = false;
        store.insert_data(&ineligible).unwrap();

        let top: Vec<f64> = store
            .top_active_data(3)
            .unwrap()
            .iter()
            .map(|r| r.product.pipo_rating)
            .collect();
        assert_eq!(top, vec![5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_resolve_node() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let seeded = store.resolve_node("gps", 0).unwrap();
        assert_eq!(seeded.code, 5);

        let created = store.resolve_node("gps", 2).unwrap();
        assert_eq!(created.code, 5);
        assert_eq!((created.index, created.stage), (0, 0));
        assert_eq!(store.node("gps", 2).unwrap(), Some(created));

        assert!(matches!(
            store.resolve_node("zzz", 0),
            Err(StoreError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_update_rating() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let status = store.insert_status(&report(1.0)).unwrap();
        let id = store.insert_data(&product(status, 1.0)).unwrap();

        store
            .update_rating(
                id,
                &RatingUpdate {
                    numerator: 3.0,
                    normalized_size: 0.25,
                    pipo_rating: 1.5,
                    uplink_eligible: false,
                    use_change: false,
                },
            )
            .unwrap();

        let rows = store.unsent_rating_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pipo_rating, 1.5);
        assert!(!rows[0].uplink_eligible);

        assert!(matches!(
            store.update_rating(
                999,
                &RatingUpdate {
                    numerator: 0.0,
                    normalized_size: 0.0,
                    pipo_rating: 0.0,
                    uplink_eligible: true,
                    use_change: false,
                }
            ),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_counts_and_comm_index() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let status = store.insert_status(&report(1.0)).unwrap();
        store.insert_data(&product(status, 1.0)).unwrap();
        store.insert_data(&product(status, 2.0)).unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.status.active, 1);
        assert_eq!(counts.data.total(), 2);

        assert_eq!(store.next_comm_index().unwrap(), 1);
        assert_eq!(store.next_comm_index().unwrap(), 2);
    }
}
