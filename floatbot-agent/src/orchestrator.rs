// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Queue orchestrator
//!
//! One [`Orchestrator::run_cycle`] call is one batch run of the agent:
//!
//! 1. return rows left PACKED by an interrupted run to ACTIVE
//! 2. re-rate every unsent data product
//! 3. ingest new data folders and remove empty ones
//! 4. pack the newest ACTIVE status, then the best rated data products
//! 5. send, then commit or roll back the cycle
//! 6. drain and dispatch inbound messages
//! 7. close the link and purge
//!
//! Only an unusable configuration or a failed recovery step aborts a cycle.
//! Faults on individual records, files or the config file are logged and
//! the cycle carries on with whatever succeeded.

use floatbot::pipo::FALLBACK_NUMERATOR;
use floatbot::{
    encoded_data_len, pack_data, pack_status, DataSegment, LinkError, OutgoingMessage, PipoEngine,
    PipoError, Transport, STATUS_SEGMENT_LEN,
};
use floatbot_store::{
    DataRecord, PurgeReport, RatingRow, RatingUpdate, RecordState, RecordStore, StatusRecord,
    StoreCounts, TransitionCounts,
};

use crate::config::{ConfigStore, CycleConfig};
use crate::error::Result;
use crate::inbox::{handle_downlink, Disposition, Inbox};
use crate::ingest::{remove_empty_folders, IngestSummary, Ingestor};

/// Outcome of the uplink step
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Sending is switched off
    Disabled,
    /// Nothing could be packed
    Empty,
    /// Message delivered and cycle committed
    Sent {
        comm_index: u32,
        bytes: usize,
        committed: TransitionCounts,
    },
    /// Connect or send failed and the cycle was rolled back
    Failed(LinkError),
}

/// Rows packed into one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackSummary {
    pub status: usize,
    pub data: usize,
    /// Candidates that did not fit and stay ACTIVE
    pub deferred: usize,
    /// Candidates skipped for a missing status or a codec fault
    pub skipped: usize,
}

/// Everything one cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Rows recovered from an interrupted run
    pub recovered: TransitionCounts,
    pub rerated: usize,
    pub ingest: IngestSummary,
    pub removed_folders: usize,
    pub packed: PackSummary,
    pub send: SendOutcome,
    pub downlinks: Vec<Disposition>,
    pub purged: PurgeReport,
    pub counts: StoreCounts,
}

impl CycleReport {
    /// Whether the send outcome allows a zero exit status
    pub fn send_ok(&self) -> bool {
        !matches!(self.send, SendOutcome::Failed(_))
    }
}

/// Drives one agent cycle over a store, a configuration and a link
pub struct Orchestrator<T: Transport> {
    store: RecordStore,
    config: ConfigStore,
    link: T,
    send_enabled: bool,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(store: RecordStore, config: ConfigStore, link: T) -> Self {
        Self {
            store,
            config,
            link,
            send_enabled: true,
        }
    }

    /// Skip the uplink step regardless of configuration
    pub fn disable_send(&mut self) {
        self.send_enabled = false;
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }

    /// Run one cycle at epoch time `now`
    pub fn run_cycle(&mut self, now: f64) -> Result<CycleReport> {
        let mut cycle = self.config.config().cycle_config();
        cycle.send &= self.send_enabled;
        let engine = PipoEngine::new(self.config.config().pipo_config())?;

        let recovered = self.store.rollback_cycle()?;
        if recovered != TransitionCounts::default() {
            tracing::warn!(
                "recovered {} status and {} data rows left packed",
                recovered.status,
                recovered.data
            );
        }

        let rerated = self.rerate(&engine, cycle.weights_changed, now);
        if cycle.weights_changed {
            if let Err(e) = self.config.clear_weights_changed() {
                // Numerators are recomputed again next cycle
                tracing::error!("cannot clear weights_changed: {}", e);
            }
        }

        let ingest = Ingestor::new(&mut self.store, &engine, &cycle.status_file, now)
            .ingest_all(&cycle.data_dir)
            .unwrap_or_else(|e| {
                tracing::error!("cannot scan {}: {}", cycle.data_dir.display(), e);
                IngestSummary::default()
            });
        let removed_folders = remove_empty_folders(&cycle.data_dir).unwrap_or_else(|e| {
            tracing::warn!("folder housekeeping failed: {}", e);
            0
        });
        tracing::info!(
            "ingested {} folders: {} statuses, {} products ({} rejected)",
            ingest.folders,
            ingest.statuses,
            ingest.products,
            ingest.rejected_products
        );

        let (send, packed, downlinks) = if cycle.send {
            self.uplink(&engine, &cycle)
        } else {
            tracing::info!("sending disabled");
            (SendOutcome::Disabled, PackSummary::default(), Vec::new())
        };

        let purged = self.store.purge(&cycle.purge, now).unwrap_or_else(|e| {
            tracing::error!("purge failed: {}", e);
            PurgeReport::default()
        });
        let counts = self.store.counts().unwrap_or_else(|e| {
            tracing::error!("cannot count records: {}", e);
            StoreCounts::default()
        });
        tracing::info!(
            "store: status {}/{}/{} data {}/{}/{} (active/packed/sent)",
            counts.status.active,
            counts.status.packed,
            counts.status.sent,
            counts.data.active,
            counts.data.packed,
            counts.data.sent
        );

        Ok(CycleReport {
            recovered,
            rerated,
            ingest,
            removed_folders,
            packed,
            send,
            downlinks,
            purged,
            counts,
        })
    }

    fn rerate(&mut self, engine: &PipoEngine, weights_changed: bool, now: f64) -> usize {
        let rows = match self.store.unsent_rating_rows() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("cannot load ratings: {}", e);
                return 0;
            }
        };

        let mut updated = 0;
        for row in &rows {
            let update = rerate_row(engine, row, weights_changed, now);
            match self.store.update_rating(row.id, &update) {
                Ok(()) => updated += 1,
                Err(e) => tracing::error!("cannot update rating of data {}: {}", row.id, e),
            }
        }
        tracing::debug!("re-rated {} data products", updated);
        updated
    }

    /// Connect, pack, send and reconcile, then drain inbound messages
    fn uplink(
        &mut self,
        engine: &PipoEngine,
        cycle: &CycleConfig,
    ) -> (SendOutcome, PackSummary, Vec<Disposition>) {
        if let Err(e) = self.link.connect() {
            tracing::warn!("connect failed: {}", e);
            self.rollback();
            return (SendOutcome::Failed(e), PackSummary::default(), Vec::new());
        }

        let mut message = OutgoingMessage::new(engine.capacity());
        let packed = self.pack(&mut message, cycle.select_limit);

        let send = if message.is_empty() {
            tracing::info!("nothing to send");
            self.rollback();
            SendOutcome::Empty
        } else {
            self.send(&message, cycle.send_retries)
        };

        let downlinks = self.drain_inbound(cycle);
        if let Err(e) = self.link.close() {
            tracing::warn!("closing link: {}", e);
        }
        (send, packed, downlinks)
    }

    fn send(&mut self, message: &OutgoingMessage, retries: u32) -> SendOutcome {
        let comm_index = self.store.next_comm_index().unwrap_or_else(|e| {
            tracing::error!("cannot advance comm index: {}", e);
            0
        });
        tracing::info!(
            "uplink {}: {} segments, {} bytes",
            comm_index,
            message.segment_count(),
            message.len()
        );

        match self.link.send(message.as_bytes(), retries) {
            Ok(()) => {
                let committed = self.store.commit_cycle().unwrap_or_else(|e| {
                    // Rows stay PACKED and are recovered next cycle
                    tracing::error!("commit after uplink {} failed: {}", comm_index, e);
                    TransitionCounts::default()
                });
                SendOutcome::Sent {
                    comm_index,
                    bytes: message.len(),
                    committed,
                }
            }
            Err(e) => {
                tracing::warn!("uplink {} failed: {}", comm_index, e);
                self.rollback();
                SendOutcome::Failed(e)
            }
        }
    }

    fn rollback(&mut self) {
        if let Err(e) = self.store.rollback_cycle() {
            tracing::error!("rollback failed: {}", e);
        }
    }

    /// Fill `message` with the newest status and the best rated products
    fn pack(&mut self, message: &mut OutgoingMessage, limit: usize) -> PackSummary {
        let mut summary = PackSummary::default();

        match self.store.latest_active_status() {
            Ok(Some(status)) => {
                if self.pack_status_record(message, &status) {
                    summary.status += 1;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!("cannot load latest status: {}", e),
        }

        let candidates = self.store.top_active_data(limit).unwrap_or_else(|e| {
            tracing::error!("cannot load uplink candidates: {}", e);
            Vec::new()
        });

        for record in &candidates {
            let status = match self.store.status_by_id(record.product.status_id) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    tracing::warn!(
                        "data {} has no status {}, skipping",
                        record.id,
                        record.product.status_id
                    );
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!("cannot load status of data {}: {}", record.id, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let needs_status = status.state == RecordState::Active;
            let (payload, _) = record.selected_payload();
            let needed = encoded_data_len(payload)
                + if needs_status { STATUS_SEGMENT_LEN } else { 0 };
            if !message.fits(needed) {
                tracing::debug!(
                    "data {} ({} bytes) does not fit in {} remaining",
                    record.id,
                    needed,
                    message.remaining()
                );
                summary.deferred += 1;
                continue;
            }

            if needs_status {
                if !self.pack_status_record(message, &status) {
                    summary.skipped += 1;
                    continue;
                }
                summary.status += 1;
            }

            if self.pack_data_record(message, record, &status) {
                summary.data += 1;
            } else {
                summary.skipped += 1;
            }
        }

        tracing::debug!("packed {:?}", summary);
        summary
    }

    fn pack_status_record(
        &mut self,
        message: &mut OutgoingMessage,
        status: &StatusRecord,
    ) -> bool {
        let mark = message.checkpoint();
        match pack_status(message, status.id, &status.report) {
            Ok(_) => {}
            Err(e) if e.is_capacity() => {
                tracing::debug!("status {} does not fit", status.id);
                return false;
            }
            Err(e) => {
                tracing::warn!("cannot encode status {}: {}", status.id, e);
                return false;
            }
        }
        if let Err(e) = self.store.mark_status_packed(status.id) {
            tracing::error!("cannot mark status {} packed, dropping it: {}", status.id, e);
            message.restore(mark);
            return false;
        }
        true
    }

    fn pack_data_record(
        &mut self,
        message: &mut OutgoingMessage,
        record: &DataRecord,
        status: &StatusRecord,
    ) -> bool {
        let product = &record.product;
        let node = match self.store.resolve_node(&product.node_type, product.instance) {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!("data {}: {}", record.id, e);
                return false;
            }
        };
        let sequence = node.next_sequence();
        let (payload, variant) = record.selected_payload();

        let segment = DataSegment {
            row_id: record.id,
            status_row_id: status.id,
            status_timestamp: status.report.timestamp,
            node_code: node.code,
            instance: product.instance,
            sequence,
            timestamp: product.timestamp,
            heading: product.heading,
            quality: product.quality,
            variant,
            payload,
        };
        let mark = message.checkpoint();
        if let Err(e) = pack_data(message, &segment) {
            tracing::warn!("cannot pack data {}: {}", record.id, e);
            return false;
        }

        if let Err(e) =
            self.store
                .mark_data_packed(record.id, &product.node_type, product.instance, sequence)
        {
            tracing::error!("cannot mark data {} packed, dropping it: {}", record.id, e);
            message.restore(mark);
            return false;
        }
        true
    }

    fn drain_inbound(&mut self, cycle: &CycleConfig) -> Vec<Disposition> {
        let messages = match self.link.receive(cycle.receive_timeout) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("receive failed: {}", e);
                return Vec::new();
            }
        };
        if messages.is_empty() {
            return Vec::new();
        }

        tracing::info!("{} inbound messages", messages.len());
        let inbox = Inbox::new(&cycle.inbox_dir);
        messages
            .iter()
            .map(|raw| handle_downlink(raw, &mut self.config, &inbox))
            .collect()
    }
}

/// New rating values for a stored product
///
/// The numerator is recomputed only when the weights changed or the size
/// factor moved; the denominator always follows the clock.
pub fn rerate_row(
    engine: &PipoEngine,
    row: &RatingRow,
    weights_changed: bool,
    now: f64,
) -> RatingUpdate {
    let (normalized, uplink_eligible, use_change) =
        match engine.compute_normalized_size(row.standard_size, row.change_size, row.change_eligible)
        {
            Ok(size) => (size.factor, true, size.use_change),
            Err(e @ PipoError::Oversize { .. }) => {
                if row.uplink_eligible {
                    tracing::warn!("data {} no longer eligible: {}", row.id, e);
                }
                (0.0, false, false)
            }
            Err(e) => {
                tracing::warn!("data {}: {}", row.id, e);
                (0.0, false, false)
            }
        };

    let numerator = if weights_changed || normalized != row.normalized_size {
        engine
            .compute_numerator(row.node_id_score, row.quality, normalized, row.trigger_score)
            .unwrap_or_else(|e| {
                tracing::warn!("data {} numerator fallback: {}", row.id, e);
                FALLBACK_NUMERATOR
            })
    } else {
        row.numerator
    };

    let rating = engine.rerate(numerator, row.timestamp, now);
    RatingUpdate {
        numerator: rating.numerator,
        normalized_size: normalized,
        pipo_rating: rating.rating,
        uplink_eligible,
        use_change,
    }
}
