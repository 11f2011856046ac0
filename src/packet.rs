// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Fixed-size packet framing for datagram links
//!
//! # Packet Format
//!
//! ```text
//! [message_id: 2 BE] [sequence: 1] [total: 1] [payload_len: 2 BE] [payload: N] [crc16: 2 BE]
//! ```
//!
//! `message_id` is the low half of the xxHash32 of the whole message, the
//! CRC (CRC-16/IBM-3740) covers header and payload.

use crate::error::{DecodeError, EncodeError};
use crc::{Crc, CRC_16_IBM_3740};
use std::collections::BTreeMap;
use xxhash_rust::xxh32::xxh32;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Header length in bytes
pub const PACKET_HEADER_LEN: usize = 6;

/// Trailer length in bytes
pub const PACKET_TRAILER_LEN: usize = 2;

/// Framing overhead per packet
pub const PACKET_OVERHEAD: usize = PACKET_HEADER_LEN + PACKET_TRAILER_LEN;

/// Identifier shared by all packets of one message
pub fn message_id(message: &[u8]) -> u16 {
    (xxh32(message, 0) & 0xFFFF) as u16
}

/// One framed slice of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub message_id: u16,
    /// 0-based position
    pub sequence: u8,
    /// Number of packets in the message
    pub total: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialize with CRC trailer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_OVERHEAD + self.payload.len());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
        buf.push(self.sequence);
        buf.push(self.total);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = CRC16.checksum(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Parse and verify one packet
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < PACKET_OVERHEAD {
            return Err(DecodeError::BufferTooShort {
                needed: PACKET_OVERHEAD,
                available: data.len(),
            });
        }

        let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
        let end = PACKET_HEADER_LEN + payload_len;
        if data.len() < end + PACKET_TRAILER_LEN {
            return Err(DecodeError::BufferTooShort {
                needed: end + PACKET_TRAILER_LEN,
                available: data.len(),
            });
        }

        let expected = u16::from_be_bytes([data[end], data[end + 1]]);
        let actual = CRC16.checksum(&data[..end]);
        if expected != actual {
            return Err(DecodeError::InvalidChecksum { expected, actual });
        }

        let packet = Self {
            message_id: u16::from_be_bytes([data[0], data[1]]),
            sequence: data[2],
            total: data[3],
            payload: data[PACKET_HEADER_LEN..end].to_vec(),
        };
        if packet.total == 0 || packet.sequence >= packet.total {
            return Err(DecodeError::MalformedMessage {
                offset: 2,
                reason: format!("sequence {} of {}", packet.sequence, packet.total),
            });
        }
        Ok(packet)
    }
}

/// Splits messages into packets of at most `packet_size` bytes
#[derive(Debug, Clone, Copy)]
pub struct Packetizer {
    packet_size: usize,
}

impl Packetizer {
    /// Create a packetizer; `packet_size` must leave room for payload
    pub fn new(packet_size: usize) -> Result<Self, EncodeError> {
        if packet_size <= PACKET_OVERHEAD || packet_size - PACKET_OVERHEAD > u16::MAX as usize {
            return Err(EncodeError::InvalidValue {
                field: "packet_size",
                value: packet_size as f64,
            });
        }
        Ok(Self { packet_size })
    }

    /// Payload bytes per packet
    pub fn payload_size(&self) -> usize {
        self.packet_size - PACKET_OVERHEAD
    }

    /// Frame a message
    pub fn split(&self, message: &[u8]) -> Result<Vec<Packet>, EncodeError> {
        let chunks: Vec<&[u8]> = if message.is_empty() {
            vec![&[][..]]
        } else {
            message.chunks(self.payload_size()).collect()
        };
        if chunks.len() > u8::MAX as usize {
            return Err(EncodeError::FieldOverflow {
                field: "packet_count",
                value: chunks.len() as u64,
                bits: 8,
            });
        }

        let id = message_id(message);
        let total = chunks.len() as u8;
        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Packet {
                message_id: id,
                sequence: i as u8,
                total,
                payload: chunk.to_vec(),
            })
            .collect())
    }
}

/// Collects packets of one message in any order
#[derive(Debug, Default)]
pub struct Reassembler {
    current: Option<(u16, u8)>,
    parts: BTreeMap<u8, Vec<u8>>,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw packet, returning the message once complete
    ///
    /// A packet from a different message discards the partial one.
    pub fn push(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        let packet = Packet::from_bytes(raw)?;
        let key = (packet.message_id, packet.total);
        if self.current != Some(key) {
            if self.current.is_some() {
                log::debug!(
                    "dropping partial message {:04x} ({} packets)",
                    self.current.map(|(id, _)| id).unwrap_or_default(),
                    self.parts.len()
                );
            }
            self.current = Some(key);
            self.parts.clear();
        }
        self.parts.insert(packet.sequence, packet.payload);

        if self.parts.len() < packet.total as usize {
            return Ok(None);
        }

        let message: Vec<u8> = std::mem::take(&mut self.parts).into_values().flatten().collect();
        self.current = None;
        if message_id(&message) != packet.message_id {
            return Err(DecodeError::MalformedMessage {
                offset: 0,
                reason: "reassembled message id mismatch".to_string(),
            });
        }
        Ok(Some(message))
    }

    /// Packets held for the current message
    pub fn pending(&self) -> usize {
        self.parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        let packet = Packet {
            message_id: 0xBEEF,
            sequence: 1,
            total: 3,
            payload: vec![0xAA, 0xBB],
        };
        let bytes = packet.to_bytes();
        assert_eq!(&bytes[..6], &[0xBE, 0xEF, 1, 3, 0, 2]);
        assert_eq!(bytes.len(), PACKET_OVERHEAD + 2);
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_crc_detects_corruption() {
        let packet = Packet {
            message_id: 1,
            sequence: 0,
            total: 1,
            payload: vec![1, 2, 3],
        };
        let mut bytes = packet.to_bytes();
        bytes[7] ^= 0x01;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(DecodeError::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn test_split_sizes() {
        let packetizer = Packetizer::new(18).unwrap();
        let message: Vec<u8> = (0..25).collect();
        let packets = packetizer.split(&message).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.to_bytes().len() <= 18));
        assert_eq!(packets[2].payload.len(), 5);
    }

    #[test]
    fn test_packet_size_too_small() {
        assert!(Packetizer::new(PACKET_OVERHEAD).is_err());
    }

    #[test]
    fn test_too_many_packets() {
        let packetizer = Packetizer::new(PACKET_OVERHEAD + 1).unwrap();
        assert!(matches!(
            packetizer.split(&[0u8; 300]),
            Err(EncodeError::FieldOverflow { .. })
        ));
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let packetizer = Packetizer::new(16).unwrap();
        let message: Vec<u8> = (0..40).map(|i| i * 3).collect();
        let mut packets = packetizer.split(&message).unwrap();
        packets.reverse();

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for p in &packets {
            result = reassembler.push(&p.to_bytes()).unwrap();
        }
        assert_eq!(result, Some(message));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_new_message_discards_partial() {
        let packetizer = Packetizer::new(12).unwrap();
        let first = packetizer.split(&[1u8; 10]).unwrap();
        let second = packetizer.split(&[2u8; 3]).unwrap();

        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(&first[0].to_bytes()).unwrap(), None);
        assert_eq!(
            reassembler.push(&second[0].to_bytes()).unwrap(),
            Some(vec![2u8; 3])
        );
    }
}
