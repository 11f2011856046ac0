//! Typed rows of the record store

use floatbot::{Payload, PayloadVariant, RecordState, StatusReport};

/// A stored status report
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub id: i64,
    pub state: RecordState,
    pub report: StatusReport,
}

/// Ingested description of one data product
#[derive(Debug, Clone, PartialEq)]
pub struct DataProduct {
    /// Owning status row
    pub status_id: i64,
    /// Three-letter node type
    pub node_type: String,
    pub instance: u32,
    pub node_code: u32,
    /// Source artifact epoch seconds
    pub timestamp: f64,
    pub heading: f64,
    pub quality: f64,
    pub node_id_score: f64,
    pub trigger_score: f64,
    pub normalized_size: f64,
    pub numerator: f64,
    pub pipo_rating: f64,
    /// False while the smallest segment exceeds the message capacity
    pub uplink_eligible: bool,
    /// A change payload exists and may be sent instead
    pub change_eligible: bool,
    /// The change payload is the one selected for uplink
    pub use_change: bool,
    pub standard: Payload,
    pub change: Option<Payload>,
    /// Encoded DATA segment size carrying the standard payload
    pub standard_size: usize,
    /// Encoded DATA segment size carrying the change payload
    pub change_size: Option<usize>,
    /// Meta file the product was read from
    pub meta_path: Option<String>,
}

/// A stored data product
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub id: i64,
    pub state: RecordState,
    /// Node sequence assigned when last packed
    pub sequence: Option<u32>,
    pub product: DataProduct,
}

impl DataRecord {
    /// Payload selected for uplink
    pub fn selected_payload(&self) -> (&Payload, PayloadVariant) {
        match (&self.product.change, self.product.use_change) {
            (Some(change), true) => (change, PayloadVariant::Change),
            _ => (&self.product.standard, PayloadVariant::Standard),
        }
    }
}

/// Sequencing state of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCounter {
    pub node_type: String,
    pub instance: u32,
    pub code: u32,
    /// Last acknowledged position
    pub index: u32,
    /// Next candidate position
    pub stage: u32,
}

impl NodeCounter {
    /// Sequence number the next packed product of this node carries
    pub fn next_sequence(&self) -> u32 {
        self.stage.wrapping_add(1)
    }
}

/// Fields needed to re-rate an active data product
#[derive(Debug, Clone, PartialEq)]
pub struct RatingRow {
    pub id: i64,
    pub timestamp: f64,
    pub quality: f64,
    pub node_id_score: f64,
    pub trigger_score: f64,
    pub normalized_size: f64,
    pub numerator: f64,
    pub pipo_rating: f64,
    pub uplink_eligible: bool,
    pub change_eligible: bool,
    pub standard_size: usize,
    pub change_size: Option<usize>,
}

/// New rating values for one data product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingUpdate {
    pub numerator: f64,
    pub normalized_size: f64,
    pub pipo_rating: f64,
    pub uplink_eligible: bool,
    pub use_change: bool,
}

/// Rows per lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateCounts {
    pub active: usize,
    pub packed: usize,
    pub sent: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.active + self.packed + self.sent
    }
}

/// Row counts of the record tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    pub status: StateCounts,
    pub data: StateCounts,
}

/// Rows touched by a commit or rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionCounts {
    pub status: usize,
    pub data: usize,
    pub nodes: usize,
}

/// Rows removed by a purge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    pub sent_status: usize,
    pub sent_data: usize,
    pub low_rating: usize,
    pub expired_status: usize,
    pub expired_data: usize,
    pub orphaned_data: usize,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.sent_status
            + self.sent_data
            + self.low_rating
            + self.expired_status
            + self.expired_data
            + self.orphaned_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floatbot::DataType;

    fn product(use_change: bool) -> DataProduct {
        DataProduct {
            status_id: 1,
            node_type: "cam".to_string(),
            instance: 0,
            node_code: 9,
            timestamp: 0.0,
            heading: 0.0,
            quality: 1.0,
            node_id_score: 1.0,
            trigger_score: 1.0,
            normalized_size: 0.5,
            numerator: 1.0,
            pipo_rating: 1.0,
            uplink_eligible: true,
            change_eligible: true,
            use_change,
            standard: Payload::new(DataType::Uint8, vec![1.0, 2.0]),
            change: Some(Payload::new(DataType::Uint8, vec![1.0])),
            standard_size: 17,
            change_size: Some(16),
            meta_path: None,
        }
    }

    #[test]
    fn test_selected_payload() {
        let record = DataRecord {
            id: 1,
            state: RecordState::Active,
            sequence: None,
            product: product(true),
        };
        let (payload, variant) = record.selected_payload();
        assert_eq!(variant, PayloadVariant::Change);
        assert_eq!(payload.item_count(), 1);

        let record = DataRecord {
            product: product(false),
            ..record
        };
        assert_eq!(record.selected_payload().1, PayloadVariant::Standard);
    }

    #[test]
    fn test_next_sequence_wraps() {
        let node = NodeCounter {
            node_type: "imu".to_string(),
            instance: 0,
            code: 3,
            index: u32::MAX,
            stage: u32::MAX,
        };
        assert_eq!(node.next_sequence(), 0);
    }
}
