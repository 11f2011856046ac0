//! # floatbot - Float store-and-forward telemetry
//!
//! Codec and priority engine for a bandwidth-constrained field device.
//! Status reports and sensor data products are ranked, packed into
//! bit-exact segments and assembled into size-bounded uplink messages.
//!
//! ## Key Features
//!
//! - **PIPO rating**: weighted priority that decays with artifact age
//! - **Bit-packed segments**: delta, sign-magnitude and modulo encoded fields
//! - **Hard size ceiling**: segments are appended whole or not at all
//! - **Transport seam**: links are consumed through a small trait
//!
//! ## Quick Start
//!
//! ```rust
//! use floatbot::{pack_status, Decoder, OutgoingMessage, Segment, StatusReport};
//!
//! let report = StatusReport {
//!     timestamp: 1_709_251_200.0,
//!     latitude: 47.6,
//!     longitude: -122.3,
//!     battery: 90.0,
//!     ..Default::default()
//! };
//!
//! let mut message = OutgoingMessage::new(340);
//! pack_status(&mut message, 1, &report).unwrap();
//!
//! let segments = Decoder::for_year(2024).unwrap().decode(message.as_bytes()).unwrap();
//! assert!(matches!(segments[0], Segment::Status(_)));
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Record states, segment kinds, payload types
//! - [`bitpack`]: MSB-first bit writer and reader
//! - [`encoder`]: Segment encoding and packing
//! - [`decoder`]: Segment decoding
//! - [`assembler`]: Size-bounded outgoing message
//! - [`pipo`]: Priority rating
//! - [`channel`]: Transport abstraction
//! - [`packet`]: Fixed-size packet framing
//! - [`recovery`]: Retry strategies

// Modules
pub mod assembler;
pub mod bitpack;
pub mod channel;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod packet;
pub mod pipo;
pub mod protocol;
pub mod recovery;

// Re-exports for convenient access
pub use assembler::{Checkpoint, OutgoingMessage};
pub use channel::{ChannelMetrics, LossyChannel, MemoryChannel, Transport};
pub use decoder::Decoder;
pub use encoder::{encoded_data_len, pack_data, pack_status, STATUS_SEGMENT_LEN};
pub use error::{DecodeError, EncodeError, LinkError, LinkErrorCode, LinkResult, PipoError};
pub use packet::{Packet, Packetizer, Reassembler};
pub use pipo::{
    NormalizedSize, PipoConfig, PipoEngine, PipoInputs, PipoWeights, Rating, TriggerPolicy,
};
pub use protocol::{
    ConfigIndices, DataSegment, DataType, DownlinkMessage, Payload, PayloadVariant, RecordState,
    Routing, Segment, SegmentKind, StatusReport,
};
pub use recovery::{with_retry, RetryStrategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_status_then_data_fill_message() {
        let report = StatusReport {
            timestamp: 1_709_251_200.0,
            ..Default::default()
        };
        let payload = Payload::new(DataType::Uint8, vec![1.0; 20]);
        let mut message = OutgoingMessage::new(STATUS_SEGMENT_LEN + 2 * encoded_data_len(&payload));

        pack_status(&mut message, 1, &report).unwrap();
        for row_id in 1..=3 {
            let result = pack_data(
                &mut message,
                &DataSegment {
                    row_id,
                    status_row_id: 1,
                    status_timestamp: report.timestamp,
                    node_code: 9,
                    instance: 0,
                    sequence: row_id as u32,
                    timestamp: report.timestamp,
                    heading: 0.0,
                    quality: 1.0,
                    variant: PayloadVariant::Standard,
                    payload: &payload,
                },
            );
            assert_eq!(result.is_ok(), row_id <= 2);
        }
        assert_eq!(message.segment_count(), 3);
        assert_eq!(message.remaining(), 0);
    }
}
