//! Segment decoder for floatbot
//!
//! Walks a message of concatenated segments and restores each field to
//! the precision it was encoded with. Used for ground-side verification
//! and by the agent's `decode` command.

use crate::bitpack::BitReader;
use crate::encoder::{layout::*, year_anchor};
use crate::error::DecodeError;
use crate::protocol::{
    ConfigIndices, DataType, DecodedData, DecodedStatus, Payload, PayloadVariant, Segment,
    SegmentKind, StatusReport, KIND_BITS,
};

/// Message decoder anchored to a calendar year
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    anchor: i64,
}

impl Decoder {
    /// Create a decoder for messages whose status timestamps fall in `year`
    pub fn for_year(year: i32) -> Result<Self, DecodeError> {
        let anchor = year_anchor(year).ok_or_else(|| DecodeError::MalformedMessage {
            offset: 0,
            reason: format!("no anchor for year {}", year),
        })?;
        Ok(Self { anchor })
    }

    /// Epoch seconds used as the status timestamp anchor
    pub fn anchor(&self) -> i64 {
        self.anchor
    }

    /// Decode every segment in `bytes`
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<Segment>, DecodeError> {
        let mut reader = BitReader::new(bytes);
        let mut segments = Vec::new();
        let mut last_status: Option<(u16, f64)> = None;

        while !reader.is_empty() {
            let offset = reader.byte_position();
            let tag = reader.read(KIND_BITS)? as u8;
            let segment = match SegmentKind::from_u8(tag) {
                Some(SegmentKind::Status) => {
                    let status = self.decode_status(&mut reader)?;
                    last_status = Some((status.row_id, status.report.timestamp));
                    Segment::Status(status)
                }
                Some(SegmentKind::Data) => {
                    Segment::Data(self.decode_data(&mut reader, last_status, offset)?)
                }
                _ => return Err(DecodeError::UnknownSegmentKind(tag)),
            };
            reader.align_to_byte();
            segments.push(segment);
        }

        Ok(segments)
    }

    fn decode_status(&self, r: &mut BitReader<'_>) -> Result<DecodedStatus, DecodeError> {
        let row_id = r.read(ROW_ID_BITS)? as u16;
        let heading = r.read(HEADING_BITS)? as f64 / HEADING_SCALE;
        let offset = r.read(YEAR_OFFSET_BITS)? as i64;
        let latitude = r.read_signed(LAT_BITS)? as f64 / COORD_SCALE;
        let longitude = r.read_signed(LON_BITS)? as f64 / COORD_SCALE;
        let battery = r.read(BATTERY_BITS)? as f64;
        let bus_voltage = r.read_signed(VOLTAGE_BITS)? as f64 / VOLTAGE_SCALE;
        let temperature = r.read_signed(TEMPERATURE_BITS)? as f64 / TEMPERATURE_SCALE;
        let pitch = r.read_signed(ATTITUDE_BITS)? as f64 / ATTITUDE_SCALE;
        let roll = r.read_signed(ATTITUDE_BITS)? as f64 / ATTITUDE_SCALE;
        let wake_event_type = r.read(WAKE_TYPE_BITS)? as u32;
        let wake_event_id = r.read(WAKE_ID_BITS)? as u32;
        let wake_count = r.read(WAKE_COUNT_BITS)? as u32;

        let mut ix = [0u32; 6];
        for slot in ix.iter_mut() {
            *slot = r.read(CONFIG_INDEX_BITS)? as u32;
        }
        let flags = r.read(FLAGS_BITS)? as u32;

        Ok(DecodedStatus {
            row_id,
            report: StatusReport {
                timestamp: (self.anchor + offset) as f64,
                latitude,
                longitude,
                heading,
                battery,
                bus_voltage,
                temperature,
                pitch,
                roll,
                wake_event_type,
                wake_event_id,
                wake_count,
                indices: ConfigIndices {
                    task: ix[0],
                    trigger: ix[1],
                    rule: ix[2],
                    sensor: ix[3],
                    node: ix[4],
                    geofence: ix[5],
                },
                flags,
            },
        })
    }

    fn decode_data(
        &self,
        r: &mut BitReader<'_>,
        last_status: Option<(u16, f64)>,
        offset: usize,
    ) -> Result<DecodedData, DecodeError> {
        let row_id = r.read(ROW_ID_BITS)? as u16;
        let status_row_id = r.read(ROW_ID_BITS)? as u16;
        let node_code = r.read(NODE_CODE_BITS)? as u32;
        let instance = r.read(INSTANCE_BITS)? as u32;
        let sequence = r.read(SEQUENCE_BITS)? as u32;
        let variant = if r.read_bool()? {
            PayloadVariant::Change
        } else {
            PayloadVariant::Standard
        };
        let timestamp_delta = r.read_signed(TS_DELTA_BITS)?;
        let heading = r.read(HEADING_BITS)? as f64 / HEADING_SCALE;
        let quality = r.read(QUALITY_BITS)? as f64 / QUALITY_SCALE;
        let tag = r.read(DTYPE_BITS)? as u8;
        let dtype = DataType::from_u8(tag).ok_or(DecodeError::UnknownDataType(tag))?;
        let count = r.read(ITEM_COUNT_BITS)? as usize;
        let rows = r.read(SHAPE_BITS)? as u32;
        let cols = r.read(SHAPE_BITS)? as u32;

        let width = dtype.bit_width();
        if r.remaining_bits() < count * width as usize {
            return Err(DecodeError::MalformedMessage {
                offset,
                reason: format!("{} {} samples truncated", count, dtype),
            });
        }

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = r.read(width)?;
            let value = match dtype {
                DataType::Uint8 => raw as f64,
                DataType::Int16 => raw as u16 as i16 as f64,
                DataType::Int32 => raw as u32 as i32 as f64,
                DataType::Float32 => f32::from_bits(raw as u32) as f64,
            };
            values.push(value);
        }

        let timestamp = last_status
            .filter(|(id, _)| *id == status_row_id)
            .map(|(_, ts)| ts + timestamp_delta as f64);

        Ok(DecodedData {
            row_id,
            status_row_id,
            node_code,
            instance,
            sequence,
            variant,
            timestamp_delta,
            timestamp,
            heading,
            quality,
            payload: Payload::with_shape(dtype, rows, cols, values),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::OutgoingMessage;
    use crate::encoder::{pack_data, pack_status};
    use crate::protocol::DataSegment;
    use approx::assert_relative_eq;

    // 2024-03-01T00:00:00Z
    const MARCH_2024: f64 = 1_709_251_200.0;

    fn report() -> StatusReport {
        StatusReport {
            timestamp: MARCH_2024 + 125.9,
            latitude: -33.868_82,
            longitude: 151.209_29,
            heading: 12.34,
            battery: 64.0,
            bus_voltage: 11.87,
            temperature: 18.25,
            pitch: -4.5,
            roll: 0.75,
            wake_event_type: 2,
            wake_event_id: 33,
            wake_count: 17,
            indices: ConfigIndices {
                task: 1,
                trigger: 0,
                rule: 2,
                sensor: 3,
                node: 4,
                geofence: 5,
            },
            flags: 0x81,
        }
    }

    #[test]
    fn test_decode_status_and_data() {
        let payload = Payload::with_shape(DataType::Int16, 2, 2, vec![-5.0, 0.0, 7.0, 32767.0]);
        let mut msg = OutgoingMessage::new(340);
        pack_status(&mut msg, 4097, &report()).unwrap();
        pack_data(
            &mut msg,
            &DataSegment {
                row_id: 22,
                status_row_id: 4097,
                status_timestamp: MARCH_2024 + 125.9,
                node_code: 10,
                instance: 2,
                sequence: 300,
                timestamp: MARCH_2024 + 65.0,
                heading: 180.0,
                quality: 0.92,
                variant: PayloadVariant::Change,
                payload: &payload,
            },
        )
        .unwrap();

        let segments = Decoder::for_year(2024).unwrap().decode(msg.as_bytes()).unwrap();
        assert_eq!(segments.len(), 2);

        let Segment::Status(status) = &segments[0] else {
            panic!("expected status first");
        };
        assert_eq!(status.row_id, 1);
        assert_eq!(status.report.timestamp, MARCH_2024 + 125.0);
        assert_relative_eq!(status.report.latitude, -33.868_82, epsilon = 2e-6);
        assert_relative_eq!(status.report.longitude, 151.209_29, epsilon = 2e-6);
        assert_relative_eq!(status.report.heading, 12.34, epsilon = 1e-9);
        assert_relative_eq!(status.report.bus_voltage, 11.87, epsilon = 0.011);
        assert_relative_eq!(status.report.temperature, 18.2, epsilon = 1e-9);
        assert_relative_eq!(status.report.pitch, -4.5, epsilon = 1e-9);
        // wake event id wraps at 5 bits
        assert_eq!(status.report.wake_event_id, 1);
        assert_eq!(status.report.indices.geofence, 5);
        assert_eq!(status.report.flags, 0x81);

        let Segment::Data(data) = &segments[1] else {
            panic!("expected data second");
        };
        assert_eq!(data.row_id, 22);
        assert_eq!(data.status_row_id, 1);
        assert_eq!(data.sequence, 300 % 256);
        assert_eq!(data.variant, PayloadVariant::Change);
        assert_eq!(data.timestamp_delta, -60);
        assert_eq!(data.timestamp, Some(MARCH_2024 + 65.0));
        assert_relative_eq!(data.quality, 0.92, epsilon = 1e-9);
        assert_eq!(data.payload, payload);
    }

    #[test]
    fn test_decode_float_samples() {
        let payload = Payload::new(DataType::Float32, vec![1.5, -0.25, 1e6]);
        let mut msg = OutgoingMessage::new(100);
        pack_data(
            &mut msg,
            &DataSegment {
                row_id: 1,
                status_row_id: 9,
                status_timestamp: MARCH_2024,
                node_code: 3,
                instance: 0,
                sequence: 1,
                timestamp: MARCH_2024,
                heading: 0.0,
                quality: 1.0,
                variant: PayloadVariant::Standard,
                payload: &payload,
            },
        )
        .unwrap();

        let segments = Decoder::for_year(2024).unwrap().decode(msg.as_bytes()).unwrap();
        let Segment::Data(data) = &segments[0] else {
            panic!("expected data");
        };
        assert_eq!(data.payload.values, vec![1.5, -0.25, 1e6]);
        // no status in this message
        assert_eq!(data.timestamp, None);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let bytes = [0b1110_0000u8, 0, 0];
        assert!(matches!(
            Decoder::for_year(2024).unwrap().decode(&bytes),
            Err(DecodeError::UnknownSegmentKind(7))
        ));
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = crate::encoder::encode_status(1, &report()).unwrap();
        let result = Decoder::for_year(2024).unwrap().decode(&bytes[..20]);
        assert!(matches!(result, Err(DecodeError::BufferTooShort { .. })));
    }
}
