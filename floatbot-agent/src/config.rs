// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Agent configuration
//!
//! [`AgentConfig`] is the persisted JSON document. At the start of each
//! cycle the orchestrator derives immutable [`PipoConfig`] and
//! [`CycleConfig`] values from it; nothing reads the document afterwards
//! except inbound configuration updates, which go through [`ConfigStore`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use floatbot::pipo::DEFAULT_HEADER_RESERVE;
use floatbot::{PipoConfig, PipoWeights, TriggerPolicy};
use floatbot_store::{PurgePolicy, DEFAULT_PURGE_RATING};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Weighting coefficients as stored in the config file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub score: f64,
    pub quality: f64,
    pub size: f64,
    pub trigger: f64,
    pub time: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        let w = PipoWeights::default();
        Self {
            score: w.score,
            quality: w.quality,
            size: w.size,
            trigger: w.trigger,
            time: w.time,
        }
    }
}

impl From<WeightsConfig> for PipoWeights {
    fn from(w: WeightsConfig) -> Self {
        PipoWeights {
            score: w.score,
            quality: w.quality,
            size: w.size,
            trigger: w.trigger,
            time: w.time,
        }
    }
}

/// UDP uplink settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    /// Datagram size including packet header and CRC
    pub packet_size: usize,
    pub timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5760,
            packet_size: 128,
            timeout_ms: 5000,
        }
    }
}

/// Persisted agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Folder holding one sub-folder per sampling event
    pub data_dir: PathBuf,
    /// Where downlink messages for the device are written
    pub inbox_dir: PathBuf,
    pub db_path: PathBuf,
    /// Status file name inside each data folder
    pub status_file: String,
    pub weights: WeightsConfig,
    /// Force recomputation of every stored numerator next cycle
    pub weights_changed: bool,
    pub purge_rating: f64,
    pub max_msg_size: usize,
    pub header_reserve: usize,
    pub retention_days: f64,
    /// Candidates fetched for one uplink message
    pub select_limit: usize,
    /// Delete SENT rows during purge
    pub db_deletes: bool,
    /// Uplink enabled
    pub comms: bool,
    pub send_retries: u32,
    pub receive_timeout_ms: u64,
    pub primary_event_type: u32,
    /// Explicit trigger scores per wake event type
    pub trigger_scores: BTreeMap<u32, f64>,
    pub link: LinkConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/float/lb"),
            inbox_dir: PathBuf::from("/data/float/inbox"),
            db_path: PathBuf::from("/data/float/float.db"),
            status_file: "sys_status.json".to_string(),
            weights: WeightsConfig::default(),
            weights_changed: false,
            purge_rating: DEFAULT_PURGE_RATING,
            max_msg_size: 340,
            header_reserve: DEFAULT_HEADER_RESERVE,
            retention_days: 5.0,
            select_limit: 32,
            db_deletes: true,
            comms: true,
            send_retries: 5,
            receive_timeout_ms: 3000,
            primary_event_type: 0,
            trigger_scores: BTreeMap::new(),
            link: LinkConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        PipoWeights::from(self.weights).validate()?;
        if self.header_reserve >= self.max_msg_size {
            return Err(AgentError::InvalidConfig(format!(
                "max_msg_size {} must exceed header_reserve {}",
                self.max_msg_size, self.header_reserve
            )));
        }
        if !self.purge_rating.is_finite() || self.purge_rating < 0.0 {
            return Err(AgentError::InvalidConfig(format!(
                "purge_rating {} must be a non-negative number",
                self.purge_rating
            )));
        }
        if !self.retention_days.is_finite() || self.retention_days <= 0.0 {
            return Err(AgentError::InvalidConfig(format!(
                "retention_days {} must be positive",
                self.retention_days
            )));
        }
        if self.select_limit == 0 {
            return Err(AgentError::InvalidConfig(
                "select_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Priority engine settings
    pub fn pipo_config(&self) -> PipoConfig {
        PipoConfig {
            weights: self.weights.into(),
            max_msg_size: self.max_msg_size,
            header_reserve: self.header_reserve,
            trigger: TriggerPolicy {
                primary_event_type: self.primary_event_type,
                overrides: self.trigger_scores.clone(),
                ..Default::default()
            },
        }
    }

    /// Per-cycle settings
    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            data_dir: self.data_dir.clone(),
            inbox_dir: self.inbox_dir.clone(),
            status_file: self.status_file.clone(),
            send: self.comms,
            select_limit: self.select_limit,
            send_retries: self.send_retries,
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            weights_changed: self.weights_changed,
            purge: PurgePolicy {
                delete_sent: self.db_deletes,
                purge_rating: self.purge_rating,
                retention_secs: self.retention_days * 24.0 * 3600.0,
            },
        }
    }
}

/// Immutable settings for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub data_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub status_file: String,
    /// Build and send an uplink message
    pub send: bool,
    pub select_limit: usize,
    pub send_retries: u32,
    pub receive_timeout: Duration,
    pub weights_changed: bool,
    pub purge: PurgePolicy,
}

/// Loads, updates and persists the agent configuration
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: AgentConfig,
}

impl ConfigStore {
    /// Load from a JSON file; missing keys take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| AgentError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig = serde_json::from_str(&text)
            .map_err(|e| AgentError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            config,
        })
    }

    /// A store that is never written to disk
    pub fn in_memory(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { path: None, config })
    }

    /// Current configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the configuration back to its file
    pub fn save(&self) -> Result<()> {
        self.persist(&self.config)
    }

    fn persist(&self, config: &AgentConfig) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;
        fs::write(path, text).map_err(|source| AgentError::ConfigIo {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Reset `weights_changed` once every numerator has been recomputed
    ///
    /// The in-memory flag only clears once the file is written.
    pub fn clear_weights_changed(&mut self) -> Result<()> {
        if self.config.weights_changed {
            let cleared = AgentConfig {
                weights_changed: false,
                ..self.config.clone()
            };
            self.persist(&cleared)?;
            self.config = cleared;
        }
        Ok(())
    }

    /// Apply identifier/value pairs from a configuration message
    ///
    /// Identifiers are top-level keys or dotted paths such as
    /// `weights.quality`. Unknown identifiers are skipped. The update is
    /// applied only if the result still validates; a weight change sets
    /// `weights_changed`. Returns the identifiers applied.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>) -> Result<Vec<String>> {
        let mut doc = serde_json::to_value(&self.config)
            .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;
        let mut applied = Vec::new();

        for (key, value) in updates {
            if set_path(&mut doc, key, value.clone()) {
                applied.push(key.clone());
            } else {
                tracing::warn!("ignoring unknown config key {}", key);
            }
        }

        let mut updated: AgentConfig = serde_json::from_value(doc)
            .map_err(|e| AgentError::InvalidConfig(format!("rejected update: {}", e)))?;
        if updated.weights != self.config.weights {
            updated.weights_changed = true;
        }
        updated.validate()?;

        self.persist(&updated)?;
        self.config = updated;
        Ok(applied)
    }
}

/// Keys whose objects accept new entries
const OPEN_MAPS: &[&str] = &["trigger_scores"];

fn set_path(doc: &mut Value, path: &str, value: Value) -> bool {
    let mut node = doc;
    let mut parent = "";
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let Some(object) = node.as_object_mut() else {
            return false;
        };
        if parts.peek().is_none() {
            if OPEN_MAPS.contains(&parent) || object.contains_key(part) {
                object.insert(part.to_string(), value);
                return true;
            }
            return false;
        }
        match object.get_mut(part) {
            Some(child) => node = child,
            None => return false,
        }
        parent = part;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_msg_size, 340);
        assert_eq!(config.purge_rating, 0.05);
        assert!(config.db_deletes);
        assert_eq!(config.weights.time, 1.0);
        config.validate().unwrap();

        let cycle = config.cycle_config();
        assert_eq!(cycle.purge.retention_secs, 432_000.0);
        assert_eq!(cycle.receive_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("floatbot.json");
        fs::write(&path, r#"{"max_msg_size": 200, "weights": {"quality": 1.0}}"#).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.config().max_msg_size, 200);
        assert_eq!(store.config().weights.quality, 1.0);
        assert_eq!(store.config().weights.score, 0.5);
        assert_eq!(store.config().status_file, "sys_status.json");
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("floatbot.json");
        fs::write(&path, r#"{"weights": {"size": 1.5}}"#).unwrap();
        assert!(matches!(
            ConfigStore::load(&path),
            Err(AgentError::Pipo(_))
        ));
        assert!(matches!(
            ConfigStore::load(dir.path().join("missing.json")),
            Err(AgentError::ConfigIo { .. })
        ));
    }

    #[test]
    fn test_apply_updates_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("floatbot.json");
        fs::write(&path, "{}").unwrap();
        let mut store = ConfigStore::load(&path).unwrap();

        let updates = json!({
            "weights.quality": 0.9,
            "select_limit": 8,
            "no_such_key": true
        });
        let applied = store.apply_updates(updates.as_object().unwrap()).unwrap();
        assert_eq!(applied.len(), 2);
        assert!(store.config().weights_changed);

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.config().weights.quality, 0.9);
        assert_eq!(reloaded.config().select_limit, 8);

        let mut reloaded = reloaded;
        reloaded.clear_weights_changed().unwrap();
        assert!(!ConfigStore::load(&path).unwrap().config().weights_changed);
    }

    #[test]
    fn test_bad_update_leaves_config() {
        let mut store = ConfigStore::in_memory(AgentConfig::default()).unwrap();
        let updates = json!({ "max_msg_size": 16 });
        assert!(store.apply_updates(updates.as_object().unwrap()).is_err());
        assert_eq!(store.config().max_msg_size, 340);

        let updates = json!({ "select_limit": "many" });
        assert!(store.apply_updates(updates.as_object().unwrap()).is_err());
        assert_eq!(store.config().select_limit, 32);
    }

    #[test]
    fn test_unsaved_update_is_not_applied() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("floatbot.json");
        fs::write(&path, r#"{"weights_changed": true}"#).unwrap();
        let mut store = ConfigStore::load(&path).unwrap();

        // A directory in place of the file makes every write fail
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        let updates = json!({ "select_limit": 8 });
        assert!(matches!(
            store.apply_updates(updates.as_object().unwrap()),
            Err(AgentError::ConfigIo { .. })
        ));
        assert_eq!(store.config().select_limit, 32);

        assert!(store.clear_weights_changed().is_err());
        assert!(store.config().weights_changed);
    }

    #[test]
    fn test_trigger_overrides() {
        let mut config = AgentConfig::default();
        config.trigger_scores.insert(3, 0.8);
        let pipo = config.pipo_config();
        assert_eq!(pipo.trigger.score(0), 1.0);
        assert_eq!(pipo.trigger.score(3), 0.8);
        assert_eq!(pipo.trigger.score(4), 0.5);
    }

    #[test]
    fn test_trigger_score_update() {
        let mut store = ConfigStore::in_memory(AgentConfig::default()).unwrap();
        let updates = json!({ "trigger_scores.2": 0.75, "weights.bogus": 1.0 });
        let applied = store.apply_updates(updates.as_object().unwrap()).unwrap();
        assert_eq!(applied, vec!["trigger_scores.2".to_string()]);
        assert_eq!(store.config().trigger_scores.get(&2), Some(&0.75));
        assert!(!store.config().weights_changed);
    }
}
