// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! MSB-first bit packing
//!
//! Segments are built field by field with exact bit widths. Values that
//! must not fail on overflow are reduced with [`wrap`] before writing,
//! physical quantities saturate with [`sign_magnitude`].

use crate::error::DecodeError;

/// Largest value representable in `bits` bits
pub fn max_value(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Modulo reduction into `bits` bits (silent rollover)
pub fn wrap(value: u64, bits: u32) -> u64 {
    value & max_value(bits)
}

/// Clamp into `bits` bits
pub fn saturate(value: u64, bits: u32) -> u64 {
    value.min(max_value(bits))
}

/// Split a signed quantity into sign bit and scaled magnitude
///
/// The magnitude is `floor(|value| * scale)`, saturated to `bits` bits.
/// Callers must reject non-finite values first.
pub fn sign_magnitude(value: f64, scale: f64, bits: u32) -> (bool, u64) {
    let negative = value < 0.0;
    let scaled = (value.abs() * scale).floor();
    let magnitude = if scaled >= max_value(bits) as f64 {
        max_value(bits)
    } else {
        scaled as u64
    };
    (negative && magnitude != 0, magnitude)
}

/// Append-only bit buffer
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer sized for `bits` bits
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity((bits + 7) / 8),
            bit_len: 0,
        }
    }

    /// Write the low `bits` bits of `value`, most significant first
    pub fn write(&mut self, value: u64, bits: u32) {
        debug_assert!(bits <= 64);
        for i in (0..bits).rev() {
            let bit = (value >> i) & 1;
            let byte_index = self.bit_len / 8;
            if byte_index == self.bytes.len() {
                self.bytes.push(0);
            }
            if bit == 1 {
                self.bytes[byte_index] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    /// Write a single flag bit
    pub fn write_bool(&mut self, flag: bool) {
        self.write(flag as u64, 1);
    }

    /// Write a sign bit followed by a `bits`-wide magnitude
    pub fn write_signed(&mut self, negative: bool, magnitude: u64, bits: u32) {
        self.write_bool(negative);
        self.write(magnitude, bits);
    }

    /// Number of bits written so far
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Zero-fill up to the next byte boundary
    pub fn pad_to_byte(&mut self) {
        let rem = self.bit_len % 8;
        if rem != 0 {
            self.bit_len += 8 - rem;
        }
    }

    /// Finish, padding the last byte
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.pad_to_byte();
        self.bytes
    }
}

/// Cursor over a packed byte slice
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Start reading at bit 0
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `bits` bits as an unsigned value
    pub fn read(&mut self, bits: u32) -> Result<u64, DecodeError> {
        let end = self.pos + bits as usize;
        if end > self.data.len() * 8 {
            return Err(DecodeError::BufferTooShort {
                needed: (end + 7) / 8,
                available: self.data.len(),
            });
        }

        let mut value = 0u64;
        for _ in 0..bits {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | bit as u64;
            self.pos += 1;
        }
        Ok(value)
    }

    /// Read one flag bit
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read(1)? == 1)
    }

    /// Read sign bit plus `bits`-wide magnitude as a signed integer
    pub fn read_signed(&mut self, bits: u32) -> Result<i64, DecodeError> {
        let negative = self.read_bool()?;
        let magnitude = self.read(bits)? as i64;
        Ok(if negative { -magnitude } else { magnitude })
    }

    /// Skip to the next byte boundary
    pub fn align_to_byte(&mut self) {
        let rem = self.pos % 8;
        if rem != 0 {
            self.pos += 8 - rem;
        }
    }

    /// Current position in whole bytes (rounded down)
    pub fn byte_position(&self) -> usize {
        self.pos / 8
    }

    /// Bits left in the buffer
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    /// Whether the cursor reached the end
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0
    }
}
