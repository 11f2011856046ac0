//! Error types for floatbot
//!
//! Each stage reports its own error: the codec, the priority engine and
//! the transport seam.

use std::fmt;
use thiserror::Error;

/// Result type alias for transport operations
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Errors during segment encoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Value is not a valid number (NaN, Inf) or outside its domain
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f64 },

    /// A field that must not wrap does not fit in its bit width
    #[error("Field {field} overflows {bits} bits: {value}")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    /// A payload sample cannot be represented in its declared type
    #[error("Sample {index} out of range for {dtype}: {value}")]
    SampleOutOfRange {
        index: usize,
        dtype: &'static str,
        value: f64,
    },

    /// Segment does not fit in the remaining message capacity
    #[error("Message full: segment needs {needed} bytes, {available} available")]
    Capacity { needed: usize, available: usize },
}

impl EncodeError {
    /// Capacity faults leave the record waiting for a later message,
    /// every other encode error marks the record itself as bad.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }
}

/// Errors during decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Buffer too short
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Unknown segment kind tag
    #[error("Unknown segment kind: {0}")]
    UnknownSegmentKind(u8),

    /// Unknown payload data type tag
    #[error("Unknown data type: {0}")]
    UnknownDataType(u8),

    /// Malformed message
    #[error("Malformed message at offset {offset}: {reason}")]
    MalformedMessage { offset: usize, reason: String },

    /// Invalid checksum
    #[error("Invalid checksum: expected {expected:04x}, got {actual:04x}")]
    InvalidChecksum { expected: u16, actual: u16 },
}

/// Errors from the priority engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipoError {
    /// An input is NaN or infinite
    #[error("Non-finite input for {0}")]
    NonFinite(&'static str),

    /// A weight lies outside [0, 1]
    #[error("Weight {name} out of range: {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    /// Header reserve leaves no room for segments
    #[error("No segment capacity: max message {max_msg_size} bytes, reserve {header_reserve}")]
    NoCapacity {
        max_msg_size: usize,
        header_reserve: usize,
    },

    /// Smallest eligible segment exceeds the message capacity
    #[error("Oversize segment: {segment} bytes exceeds capacity {capacity}")]
    Oversize { segment: usize, capacity: usize },
}

/// Transport failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkErrorCode {
    /// Operation requires an open connection
    NotConnected,
    /// Connection could not be established
    ConnectFailed,
    /// Message could not be delivered
    SendFailed,
    /// Inbound read failed
    ReceiveFailed,
    /// Nothing happened before the deadline
    Timeout,
    /// Teardown failed
    CloseFailed,
}

impl LinkErrorCode {
    /// Numeric code as reported in logs
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::NotConnected => 1,
            Self::ConnectFailed => 2,
            Self::SendFailed => 3,
            Self::ReceiveFailed => 4,
            Self::Timeout => 5,
            Self::CloseFailed => 6,
        }
    }
}

impl fmt::Display for LinkErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotConnected => "not connected",
            Self::ConnectFailed => "connect failed",
            Self::SendFailed => "send failed",
            Self::ReceiveFailed => "receive failed",
            Self::Timeout => "timeout",
            Self::CloseFailed => "close failed",
        };
        write!(f, "{} ({})", name, self.as_i32())
    }
}

/// Outcome of a failed transport call: an error code plus a message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct LinkError {
    pub code: LinkErrorCode,
    pub message: String,
}

impl LinkError {
    /// Create a link error
    pub fn new(code: LinkErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EncodeError::Capacity {
            needed: 40,
            available: 12,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("40"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_capacity_classification() {
        assert!(EncodeError::Capacity {
            needed: 1,
            available: 0
        }
        .is_capacity());
        assert!(!EncodeError::InvalidValue {
            field: "heading",
            value: f64::NAN
        }
        .is_capacity());
    }

    #[test]
    fn test_link_error_display() {
        let err = LinkError::new(LinkErrorCode::SendFailed, "modem busy");
        let msg = err.to_string();
        assert!(msg.contains("send failed (3)"));
        assert!(msg.contains("modem busy"));
    }
}
