// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Data folder ingestion
//!
//! Each sub-folder of the data directory holds one status file and any
//! number of `*_meta.json` files, each naming a standard payload file and
//! optionally a change payload file. A folder whose status cannot be read
//! or stored is deleted whole. A product that cannot be read, rated or
//! stored has only its own files deleted. Consumed files are removed so a
//! fully ingested folder ends up empty.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use floatbot::encoder::{encode_data, encode_status, encoded_data_len};
use floatbot::{
    ConfigIndices, DataSegment, DataType, Payload, PayloadVariant, PipoEngine, PipoError,
    PipoInputs, StatusReport,
};
use floatbot_store::{DataProduct, RecordStore};
use serde::{de::DeserializeOwned, Deserialize};

use crate::error::IngestError;

/// Suffix of data product description files
pub const META_SUFFIX: &str = "_meta.json";

/// Epoch seconds or an RFC 3339 string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Epoch(f64),
    Text(String),
}

impl Timestamp {
    fn to_epoch(&self, path: &Path) -> Result<f64, IngestError> {
        match self {
            Timestamp::Epoch(ts) if ts.is_finite() => Ok(*ts),
            Timestamp::Epoch(ts) => Err(IngestError::format(path, "timestamp", ts.to_string())),
            Timestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp_micros() as f64 / 1_000_000.0)
                .map_err(|e| IngestError::format(path, "timestamp", e.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusFile {
    timestamp: Timestamp,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
    #[serde(default)]
    heading: f64,
    #[serde(default)]
    battery: f64,
    #[serde(default)]
    bus_voltage: f64,
    #[serde(default)]
    temperature: f64,
    #[serde(default)]
    pitch: f64,
    #[serde(default)]
    roll: f64,
    #[serde(default)]
    wake_event_type: u32,
    #[serde(default)]
    wake_event_id: u32,
    #[serde(default)]
    wake_count: u32,
    #[serde(default)]
    task_index: u32,
    #[serde(default)]
    trigger_index: u32,
    #[serde(default)]
    rule_index: u32,
    #[serde(default)]
    sensor_index: u32,
    #[serde(default)]
    node_index: u32,
    #[serde(default)]
    geofence_index: u32,
    #[serde(default)]
    flags: u32,
}

#[derive(Debug, Deserialize)]
struct MetaFile {
    node_type: String,
    #[serde(default)]
    instance: u32,
    #[serde(default = "one")]
    quality: f64,
    #[serde(default = "one")]
    node_id_score: f64,
    timestamp: Timestamp,
    #[serde(default)]
    heading: f64,
    data_file: String,
    #[serde(default)]
    change_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadFile {
    dtype: String,
    #[serde(default)]
    rows: u32,
    #[serde(default)]
    cols: u32,
    data: Vec<f64>,
}

fn one() -> f64 {
    1.0
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let text = fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| IngestError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and validate a status file
pub fn read_status(path: &Path) -> Result<StatusReport, IngestError> {
    let raw: StatusFile = read_json(path)?;
    let timestamp = raw.timestamp.to_epoch(path)?;
    if !(-90.0..=90.0).contains(&raw.latitude) {
        return Err(IngestError::format(
            path,
            "latitude",
            raw.latitude.to_string(),
        ));
    }
    if !(-180.0..=180.0).contains(&raw.longitude) {
        return Err(IngestError::format(
            path,
            "longitude",
            raw.longitude.to_string(),
        ));
    }

    let report = StatusReport {
        timestamp,
        latitude: raw.latitude,
        longitude: raw.longitude,
        heading: raw.heading,
        battery: raw.battery,
        bus_voltage: raw.bus_voltage,
        temperature: raw.temperature,
        pitch: raw.pitch,
        roll: raw.roll,
        wake_event_type: raw.wake_event_type,
        wake_event_id: raw.wake_event_id,
        wake_count: raw.wake_count,
        indices: ConfigIndices {
            task: raw.task_index,
            trigger: raw.trigger_index,
            rule: raw.rule_index,
            sensor: raw.sensor_index,
            node: raw.node_index,
            geofence: raw.geofence_index,
        },
        flags: raw.flags,
    };

    // A status the codec rejects would hold back every product of its folder
    encode_status(0, &report).map_err(|source| IngestError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(report)
}

fn read_payload(path: &Path) -> Result<Payload, IngestError> {
    let raw: PayloadFile = read_json(path)?;
    let dtype = DataType::from_name(&raw.dtype)
        .ok_or_else(|| IngestError::format(path, "dtype", raw.dtype.clone()))?;
    let payload = Payload::with_shape(dtype, raw.rows, raw.cols, raw.data);

    // Test-encode so that only products the codec can carry are stored
    let trial = DataSegment {
        row_id: 0,
        status_row_id: 0,
        status_timestamp: 0.0,
        node_code: 0,
        instance: 0,
        sequence: 0,
        timestamp: 0.0,
        heading: 0.0,
        quality: 0.0,
        variant: PayloadVariant::Standard,
        payload: &payload,
    };
    encode_data(&trial).map_err(|source| IngestError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(payload)
}

/// Files making up one data product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductFiles {
    pub meta: PathBuf,
    pub standard: Option<PathBuf>,
    pub change: Option<PathBuf>,
}

impl ProductFiles {
    fn remove(&self) {
        for path in [Some(&self.meta), self.standard.as_ref(), self.change.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("cannot remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// What happened to one data folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Status stored; `stored` products inserted, `rejected` deleted
    Ingested {
        status_id: i64,
        stored: usize,
        rejected: usize,
    },
    /// Status stored but the folder had no meta files; folder deleted
    NoProducts { status_id: i64 },
    /// Status unreadable or not storable; folder deleted
    Rejected { reason: String },
}

/// Totals over one ingestion pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSummary {
    pub folders: usize,
    pub statuses: usize,
    pub products: usize,
    pub rejected_products: usize,
    pub deleted_folders: usize,
}

impl IngestSummary {
    fn record(&mut self, outcome: &IngestOutcome) {
        self.folders += 1;
        match outcome {
            IngestOutcome::Ingested {
                stored, rejected, ..
            } => {
                self.statuses += 1;
                self.products += stored;
                self.rejected_products += rejected;
            }
            IngestOutcome::NoProducts { .. } => {
                self.statuses += 1;
                self.deleted_folders += 1;
            }
            IngestOutcome::Rejected { .. } => self.deleted_folders += 1,
        }
    }
}

/// Moves data folders into the record store
pub struct Ingestor<'a> {
    store: &'a mut RecordStore,
    engine: &'a PipoEngine,
    status_file: &'a str,
    now: f64,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a mut RecordStore,
        engine: &'a PipoEngine,
        status_file: &'a str,
        now: f64,
    ) -> Self {
        Self {
            store,
            engine,
            status_file,
            now,
        }
    }

    /// Ingest every sub-folder of `data_dir` in name order
    pub fn ingest_all(&mut self, data_dir: &Path) -> std::io::Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        if !data_dir.exists() {
            tracing::debug!("data dir {} does not exist", data_dir.display());
            return Ok(summary);
        }

        for folder in sorted_entries(data_dir, |p| p.is_dir())? {
            let outcome = self.ingest_folder(&folder);
            tracing::debug!("{}: {:?}", folder.display(), outcome);
            summary.record(&outcome);
        }
        Ok(summary)
    }

    /// Ingest one data folder
    pub fn ingest_folder(&mut self, folder: &Path) -> IngestOutcome {
        let status_path = folder.join(self.status_file);
        let inserted = read_status(&status_path).and_then(|report| {
            let id = self.store.insert_status(&report)?;
            Ok((id, report))
        });
        let (status_id, report) = match inserted {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::warn!("rejecting folder {}: {}", folder.display(), e);
                remove_folder(folder);
                return IngestOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };
        remove_file(&status_path);

        let trigger = self.engine.trigger_score(report.wake_event_type);

        let metas = match sorted_entries(folder, |p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(META_SUFFIX))
        }) {
            Ok(metas) => metas,
            Err(e) => {
                tracing::warn!("cannot list {}: {}", folder.display(), e);
                Vec::new()
            }
        };

        if metas.is_empty() {
            tracing::info!("no data products in {}, removing", folder.display());
            remove_folder(folder);
            return IngestOutcome::NoProducts { status_id };
        }

        let mut stored = 0;
        let mut rejected = 0;
        for meta in metas {
            let (files, result) = self.ingest_product(&meta, status_id, trigger);
            match result {
                Ok(id) => {
                    tracing::debug!("stored {} as data {}", meta.display(), id);
                    stored += 1;
                }
                Err(e) => {
                    tracing::warn!("rejecting {}: {}", meta.display(), e);
                    rejected += 1;
                }
            }
            files.remove();
        }

        IngestOutcome::Ingested {
            status_id,
            stored,
            rejected,
        }
    }

    fn ingest_product(
        &mut self,
        meta_path: &Path,
        status_id: i64,
        trigger: f64,
    ) -> (ProductFiles, Result<i64, IngestError>) {
        let mut files = ProductFiles {
            meta: meta_path.to_path_buf(),
            standard: None,
            change: None,
        };
        let result = self.build_product(meta_path, status_id, trigger, &mut files);
        (files, result)
    }

    fn build_product(
        &mut self,
        meta_path: &Path,
        status_id: i64,
        trigger: f64,
        files: &mut ProductFiles,
    ) -> Result<i64, IngestError> {
        let meta: MetaFile = read_json(meta_path)?;
        let folder = meta_path.parent().unwrap_or_else(|| Path::new("."));

        let standard_path = folder.join(&meta.data_file);
        files.standard = Some(standard_path.clone());
        let change_path = meta
            .change_file
            .as_deref()
            .filter(|name| !is_no_change(name))
            .map(|name| folder.join(name));
        files.change = change_path.clone();

        let timestamp = meta.timestamp.to_epoch(meta_path)?;
        let node_type = meta.node_type.trim().to_ascii_lowercase();
        if node_type.is_empty() {
            return Err(IngestError::format(meta_path, "node_type", "empty"));
        }
        let node = self.store.resolve_node(&node_type, meta.instance)?;

        let standard = read_payload(&standard_path)?;
        let change = change_path.as_deref().map(read_payload).transpose()?;

        let standard_size = encoded_data_len(&standard);
        let change_size = change.as_ref().map(encoded_data_len);
        let change_eligible = change.is_some();

        let (normalized, uplink_eligible, use_change) =
            match self
                .engine
                .compute_normalized_size(standard_size, change_size, change_eligible)
            {
                Ok(size) => (size.factor, true, size.use_change),
                Err(e @ PipoError::Oversize { .. }) => {
                    tracing::warn!("{} not eligible for uplink: {}", meta_path.display(), e);
                    (0.0, false, false)
                }
                Err(e) => return Err(IngestError::format(meta_path, "size", e.to_string())),
            };

        let rating = self.engine.rate(
            &PipoInputs {
                score: meta.node_id_score,
                quality: meta.quality,
                normalized_size: normalized,
                trigger,
                source_timestamp: timestamp,
            },
            self.now,
        );

        let product = DataProduct {
            status_id,
            node_type,
            instance: meta.instance,
            node_code: node.code,
            timestamp,
            heading: meta.heading,
            quality: meta.quality,
            node_id_score: meta.node_id_score,
            trigger_score: trigger,
            normalized_size: normalized,
            numerator: rating.numerator,
            pipo_rating: rating.rating,
            uplink_eligible,
            change_eligible,
            use_change,
            standard,
            change,
            standard_size,
            change_size,
            meta_path: Some(meta_path.display().to_string()),
        };
        Ok(self.store.insert_data(&product)?)
    }
}

fn is_no_change(name: &str) -> bool {
    let name = name.trim();
    name.is_empty() || name.eq_ignore_ascii_case("nc") || name.eq_ignore_ascii_case("null")
}

fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!("cannot remove {}: {}", path.display(), e);
    }
}

fn remove_folder(folder: &Path) {
    if let Err(e) = fs::remove_dir_all(folder) {
        tracing::warn!("cannot remove folder {}: {}", folder.display(), e);
    }
}

/// Delete every empty sub-folder of `data_dir`, returning how many went
pub fn remove_empty_folders(data_dir: &Path) -> std::io::Result<usize> {
    if !data_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for folder in sorted_entries(data_dir, |p| p.is_dir())? {
        if fs::read_dir(&folder)?.next().is_none() {
            fs::remove_dir(&folder)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use floatbot::PipoConfig;
    use tempfile::TempDir;

    const NOW: f64 = 1_709_251_200.0;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_read_status_rfc3339() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "sys_status.json",
            r#"{"timestamp": "2024-03-01T00:00:00.5Z", "latitude": 12.5, "flags": 3, "geofence_index": 2}"#,
        );
        let report = read_status(&dir.path().join("sys_status.json")).unwrap();
        assert_eq!(report.timestamp, NOW + 0.5);
        assert_eq!(report.latitude, 12.5);
        assert_eq!(report.indices.geofence, 2);
        assert_eq!(report.flags, 3);
    }

    #[test]
    fn test_read_status_rejects_bad_latitude() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "sys_status.json",
            r#"{"timestamp": 1709251200, "latitude": 91.0}"#,
        );
        assert!(matches!(
            read_status(&dir.path().join("sys_status.json")),
            Err(IngestError::Format {
                field: "latitude",
                ..
            })
        ));
    }

    #[test]
    fn test_read_status_rejects_unencodable_fields() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "lon.json",
            r#"{"timestamp": 1709251200, "longitude": 200.0}"#,
        );
        write(dir.path(), "ts.json", r#"{"timestamp": -60.0}"#);
        write(
            dir.path(),
            "heading.json",
            r#"{"timestamp": 1709251200, "heading": 1e400}"#,
        );

        assert!(matches!(
            read_status(&dir.path().join("lon.json")),
            Err(IngestError::Format {
                field: "longitude",
                ..
            })
        ));
        assert!(matches!(
            read_status(&dir.path().join("ts.json")),
            Err(IngestError::Encode { .. })
        ));
        assert!(read_status(&dir.path().join("heading.json")).is_err());
    }

    #[test]
    fn test_read_payload_checks() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.json", r#"{"dtype": "int64", "data": [1]}"#);
        write(dir.path(), "b.json", r#"{"dtype": "uint8", "data": [300]}"#);
        write(dir.path(), "c.json", r#"{"dtype": "int16", "rows": 1, "cols": 2, "data": [-5, 5]}"#);

        assert!(matches!(
            read_payload(&dir.path().join("a.json")),
            Err(IngestError::Format { field: "dtype", .. })
        ));
        assert!(matches!(
            read_payload(&dir.path().join("b.json")),
            Err(IngestError::Encode { .. })
        ));
        let payload = read_payload(&dir.path().join("c.json")).unwrap();
        assert_eq!((payload.rows, payload.cols), (1, 2));
    }

    #[test]
    fn test_rejected_product_removes_only_its_files() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("20240301T000000");
        fs::create_dir(&folder).unwrap();
        write(&folder, "sys_status.json", r#"{"timestamp": 1709251200}"#);
        write(
            &folder,
            "imu_meta.json",
            r#"{"node_type": "imu", "timestamp": 1709251100, "data_file": "imu_std.json"}"#,
        );
        write(&folder, "imu_std.json", r#"{"dtype": "int16", "data": [1, 2, 3]}"#);
        write(
            &folder,
            "zzz_meta.json",
            r#"{"node_type": "zzz", "timestamp": 1709251100, "data_file": "zzz_std.json"}"#,
        );
        write(&folder, "zzz_std.json", r#"{"dtype": "uint8", "data": [1]}"#);
        write(&folder, "notes.txt", "kept");

        let mut store = RecordStore::open_in_memory().unwrap();
        let engine = PipoEngine::new(PipoConfig::default()).unwrap();
        let mut ingestor = Ingestor::new(&mut store, &engine, "sys_status.json", NOW);

        let outcome = ingestor.ingest_folder(&folder);
        assert!(matches!(
            outcome,
            IngestOutcome::Ingested {
                stored: 1,
                rejected: 1,
                ..
            }
        ));
        assert!(!folder.join("zzz_std.json").exists());
        assert!(!folder.join("imu_std.json").exists());
        assert!(folder.join("notes.txt").exists());
        assert_eq!(store.counts().unwrap().data.active, 1);
    }

    #[test]
    fn test_oversize_product_is_ineligible() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("f1");
        fs::create_dir(&folder).unwrap();
        write(&folder, "sys_status.json", r#"{"timestamp": 1709251200}"#);
        write(
            &folder,
            "cam_meta.json",
            r#"{"node_type": "cam", "timestamp": 1709251200, "data_file": "cam_std.json", "change_file": "NC"}"#,
        );
        let big: Vec<String> = (0..400).map(|i| (i % 200).to_string()).collect();
        write(
            &folder,
            "cam_std.json",
            &format!(r#"{{"dtype": "uint8", "data": [{}]}}"#, big.join(",")),
        );

        let mut store = RecordStore::open_in_memory().unwrap();
        let engine = PipoEngine::new(PipoConfig::default()).unwrap();
        Ingestor::new(&mut store, &engine, "sys_status.json", NOW).ingest_folder(&folder);

        assert!(store.top_active_data(10).unwrap().is_empty());
        let rows = store.unsent_rating_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].uplink_eligible);
        assert_eq!(rows[0].normalized_size, 0.0);
    }

    #[test]
    fn test_remove_empty_folders() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::create_dir(dir.path().join("full")).unwrap();
        write(&dir.path().join("full"), "x.json", "{}");

        assert_eq!(remove_empty_folders(dir.path()).unwrap(), 1);
        assert!(dir.path().join("full").exists());
        assert_eq!(remove_empty_folders(&dir.path().join("missing")).unwrap(), 0);
    }
}
