// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Outgoing message assembly
//!
//! An [`OutgoingMessage`] is the append-only buffer one uplink is built in.
//! Segments are appended whole or not at all, so the buffer never grows
//! past `max_size`.

use crate::error::EncodeError;

/// Position in a message that later appends can be undone back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    len: usize,
    segments: usize,
}

/// Size-bounded buffer of concatenated segments
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    buffer: Vec<u8>,
    max_size: usize,
    segments: usize,
}

impl OutgoingMessage {
    /// Create an empty message with the given byte ceiling
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
            segments: 0,
        }
    }

    /// Append an encoded segment, fails without mutation if it would not fit
    pub fn try_append(&mut self, segment: &[u8]) -> Result<(), EncodeError> {
        if self.buffer.len() + segment.len() > self.max_size {
            return Err(EncodeError::Capacity {
                needed: segment.len(),
                available: self.remaining(),
            });
        }

        self.buffer.extend_from_slice(segment);
        self.segments += 1;
        Ok(())
    }

    /// Whether `len` more bytes would fit
    pub fn fits(&self, len: usize) -> bool {
        self.buffer.len() + len <= self.max_size
    }

    /// Get the remaining space in bytes
    pub fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.buffer.len())
    }

    /// Current length in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing was appended
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Byte ceiling
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of appended segments
    pub fn segment_count(&self) -> usize {
        self.segments
    }

    /// Message bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Current position, for a later [`OutgoingMessage::restore`]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.buffer.len(),
            segments: self.segments,
        }
    }

    /// Drop every segment appended after `checkpoint`
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        if checkpoint.len <= self.buffer.len() {
            self.buffer.truncate(checkpoint.len);
            self.segments = checkpoint.segments;
        }
    }

    /// Clear for the next cycle
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.segments = 0;
    }
}
