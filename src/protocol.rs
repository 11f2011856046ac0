//! Protocol definitions for floatbot
//!
//! This module defines the core types shared by the codec, the record
//! store and the orchestrator:
//! - Record lifecycle states
//! - Segment kinds and payload data types
//! - Status reports and data payloads
//! - Decoded segment views

use crate::error::DecodeError;
use std::fmt;

/// Bit width of the segment kind tag
pub const KIND_BITS: u32 = 3;

/// Lifecycle state of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RecordState {
    /// Waiting for uplink
    #[default]
    Active = 0,
    /// Embedded in the message currently being sent
    Packed = 1,
    /// Confirmed delivered
    Sent = 2,
}

impl RecordState {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordState::Active),
            1 => Some(RecordState::Packed),
            2 => Some(RecordState::Sent),
            _ => None,
        }
    }

    /// Upper-case state name
    pub fn name(&self) -> &'static str {
        match self {
            RecordState::Active => "ACTIVE",
            RecordState::Packed => "PACKED",
            RecordState::Sent => "SENT",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Segment kind tag (first 3 bits of every segment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegmentKind {
    /// Device status
    Status = 1,
    /// Sensor data product
    Data = 2,
    /// Downlink configuration update
    Config = 3,
    /// Downlink general command
    General = 4,
}

impl SegmentKind {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SegmentKind::Status),
            2 => Some(SegmentKind::Data),
            3 => Some(SegmentKind::Config),
            4 => Some(SegmentKind::General),
            _ => None,
        }
    }
}

/// Sample type of a data payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// Unsigned 8-bit integer
    Uint8 = 0,
    /// Signed 16-bit integer
    Int16 = 1,
    /// Signed 32-bit integer
    Int32 = 2,
    /// IEEE 754 single precision
    Float32 = 3,
}

impl DataType {
    /// Convert from the 2-bit wire tag
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DataType::Uint8),
            1 => Some(DataType::Int16),
            2 => Some(DataType::Int32),
            3 => Some(DataType::Float32),
            _ => None,
        }
    }

    /// Parse a type name as written in payload files
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "uint8" | "u8" => Some(DataType::Uint8),
            "int16" | "i16" => Some(DataType::Int16),
            "int32" | "i32" => Some(DataType::Int32),
            "float32" | "f32" | "float" => Some(DataType::Float32),
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Uint8 => "uint8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
        }
    }

    /// Width of one sample on the wire
    pub fn bit_width(&self) -> u32 {
        match self {
            DataType::Uint8 => 8,
            DataType::Int16 => 16,
            DataType::Int32 | DataType::Float32 => 32,
        }
    }

    /// Width of one sample in bytes
    pub fn byte_width(&self) -> usize {
        self.bit_width() as usize / 8
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which payload of a data product a DATA segment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PayloadVariant {
    /// Full sample set
    #[default]
    Standard = 0,
    /// Delta against a previous sample
    Change = 1,
}

/// Typed sample array, optionally 2-D
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Sample type
    pub dtype: DataType,
    /// Row count for 2-D data, 0 for 1-D
    pub rows: u32,
    /// Column count for 2-D data, 0 for 1-D
    pub cols: u32,
    /// Sample values, row-major
    pub values: Vec<f64>,
}

impl Payload {
    /// Create a 1-D payload
    pub fn new(dtype: DataType, values: Vec<f64>) -> Self {
        Self {
            dtype,
            rows: 0,
            cols: 0,
            values,
        }
    }

    /// Create a 2-D payload
    pub fn with_shape(dtype: DataType, rows: u32, cols: u32, values: Vec<f64>) -> Self {
        Self {
            dtype,
            rows,
            cols,
            values,
        }
    }

    /// Number of samples
    pub fn item_count(&self) -> usize {
        self.values.len()
    }

    /// Raw byte length of the samples
    pub fn byte_len(&self) -> usize {
        self.values.len() * self.dtype.byte_width()
    }
}

/// Small configuration-index references carried in every status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigIndices {
    pub task: u32,
    pub trigger: u32,
    pub rule: u32,
    pub sensor: u32,
    pub node: u32,
    pub geofence: u32,
}

/// Device status captured at one wake event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    /// Epoch seconds, fractional
    pub timestamp: f64,
    /// Degrees, signed
    pub latitude: f64,
    /// Degrees, signed
    pub longitude: f64,
    /// Degrees
    pub heading: f64,
    /// Percent
    pub battery: f64,
    /// Volts
    pub bus_voltage: f64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Degrees
    pub pitch: f64,
    /// Degrees
    pub roll: f64,
    pub wake_event_type: u32,
    pub wake_event_id: u32,
    pub wake_count: u32,
    pub indices: ConfigIndices,
    /// Device state bit field
    pub flags: u32,
}

/// Everything needed to encode one DATA segment
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment<'a> {
    /// Data record row id
    pub row_id: i64,
    /// Owning status row id
    pub status_row_id: i64,
    /// Owning status timestamp (delta anchor)
    pub status_timestamp: f64,
    /// Node type code
    pub node_code: u32,
    /// Node instance
    pub instance: u32,
    /// Node sequence number for this uplink
    pub sequence: u32,
    /// Source artifact timestamp
    pub timestamp: f64,
    /// Degrees
    pub heading: f64,
    /// Quality score in [0, 1]
    pub quality: f64,
    /// Payload variant carried
    pub variant: PayloadVariant,
    /// Samples
    pub payload: &'a Payload,
}

/// STATUS segment as read back from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStatus {
    /// Row id reduced to 12 bits
    pub row_id: u16,
    /// Report with fields restored to their wire precision
    pub report: StatusReport,
}

/// DATA segment as read back from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedData {
    pub row_id: u16,
    pub status_row_id: u16,
    pub node_code: u32,
    pub instance: u32,
    pub sequence: u32,
    pub variant: PayloadVariant,
    /// Seconds relative to the owning status
    pub timestamp_delta: i64,
    /// Absolute timestamp when the owning status is in the same message
    pub timestamp: Option<f64>,
    pub heading: f64,
    pub quality: f64,
    pub payload: Payload,
}

/// One decoded segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Status(DecodedStatus),
    Data(DecodedData),
}

impl Segment {
    /// Kind tag of this segment
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Status(_) => SegmentKind::Status,
            Segment::Data(_) => SegmentKind::Data,
        }
    }
}

/// Routing target of a downlink message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Routing {
    /// Handled by this agent
    Agent = 0,
    /// Forwarded to the device inbox
    Device = 1,
}

/// Inbound message from the ground
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkMessage {
    pub kind: SegmentKind,
    pub routing: Routing,
    /// Ground-side communication index
    pub comm_index: u16,
    /// JSON object text of identifier/value pairs
    pub body: String,
}

impl DownlinkMessage {
    /// Header length: flags byte plus comm index
    pub const HEADER_LEN: usize = 3;

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + self.body.len());
        buf.push(((self.kind as u8) << 5) | ((self.routing as u8) << 4));
        buf.extend_from_slice(&self.comm_index.to_be_bytes());
        buf.extend_from_slice(self.body.as_bytes());
        buf
    }

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(DecodeError::BufferTooShort {
                needed: Self::HEADER_LEN,
                available: bytes.len(),
            });
        }

        let tag = bytes[0] >> 5;
        let kind = match SegmentKind::from_u8(tag) {
            Some(k @ (SegmentKind::Config | SegmentKind::General)) => k,
            _ => return Err(DecodeError::UnknownSegmentKind(tag)),
        };
        let routing = if (bytes[0] >> 4) & 1 == 1 {
            Routing::Device
        } else {
            Routing::Agent
        };
        let comm_index = u16::from_be_bytes([bytes[1], bytes[2]]);
        let body = std::str::from_utf8(&bytes[Self::HEADER_LEN..])
            .map_err(|e| DecodeError::MalformedMessage {
                offset: Self::HEADER_LEN + e.valid_up_to(),
                reason: "body is not UTF-8".to_string(),
            })?
            .to_string();

        Ok(Self {
            kind,
            routing,
            comm_index,
            body,
        })
    }
}
