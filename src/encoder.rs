//! Segment encoder for floatbot
//!
//! Packs status reports and data products into the bit-exact segments of
//! format revision 1. All field widths live in [`layout`] so the decoder
//! reads exactly what is written here.
//!
//! Encoding rules:
//! - identifiers, counters and config indices wrap modulo their width
//! - physical quantities are sign + scaled magnitude and saturate
//! - timestamps are deltas (year start for status, owning status for data)
//! - payload item count and shape never wrap; overflow is a format error

use crate::assembler::OutgoingMessage;
use crate::bitpack::{max_value, saturate, sign_magnitude, wrap, BitWriter};
use crate::error::EncodeError;
use crate::protocol::{DataSegment, DataType, Payload, SegmentKind, StatusReport, KIND_BITS};
use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Field widths of format revision 1
pub mod layout {
    pub const ROW_ID_BITS: u32 = 12;
    pub const HEADING_BITS: u32 = 16;
    pub const YEAR_OFFSET_BITS: u32 = 25;
    pub const LAT_BITS: u32 = 27;
    pub const LON_BITS: u32 = 28;
    pub const BATTERY_BITS: u32 = 7;
    pub const VOLTAGE_BITS: u32 = 15;
    pub const TEMPERATURE_BITS: u32 = 11;
    pub const ATTITUDE_BITS: u32 = 11;
    pub const WAKE_TYPE_BITS: u32 = 3;
    pub const WAKE_ID_BITS: u32 = 5;
    pub const WAKE_COUNT_BITS: u32 = 12;
    pub const CONFIG_INDEX_BITS: u32 = 4;
    pub const FLAGS_BITS: u32 = 8;

    pub const NODE_CODE_BITS: u32 = 6;
    pub const INSTANCE_BITS: u32 = 4;
    pub const SEQUENCE_BITS: u32 = 8;
    pub const TS_DELTA_BITS: u32 = 20;
    pub const QUALITY_BITS: u32 = 7;
    pub const DTYPE_BITS: u32 = 2;
    pub const ITEM_COUNT_BITS: u32 = 12;
    pub const SHAPE_BITS: u32 = 8;

    pub const HEADING_SCALE: f64 = 100.0;
    pub const COORD_SCALE: f64 = 1_000_000.0;
    pub const VOLTAGE_SCALE: f64 = 100.0;
    pub const TEMPERATURE_SCALE: f64 = 10.0;
    pub const ATTITUDE_SCALE: f64 = 10.0;
    pub const QUALITY_SCALE: f64 = 100.0;
}

use layout::*;

/// Encoded size of a STATUS segment in bytes
pub const STATUS_SEGMENT_LEN: usize = 28;

/// Encoded size of a DATA segment header in bytes
pub const DATA_HEADER_LEN: usize = 15;

/// Encoded size of a DATA segment carrying `payload`
pub fn encoded_data_len(payload: &Payload) -> usize {
    DATA_HEADER_LEN + payload.byte_len()
}

/// Epoch seconds of January 1st 00:00 UTC of the year containing `timestamp`
pub fn year_start(timestamp: f64) -> Result<f64, EncodeError> {
    let invalid = EncodeError::InvalidValue {
        field: "timestamp",
        value: timestamp,
    };
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(invalid);
    }
    let dt = DateTime::<Utc>::from_timestamp(timestamp.floor() as i64, 0).ok_or(invalid.clone())?;
    year_anchor(dt.year())
        .map(|secs| secs as f64)
        .ok_or(invalid)
}

/// Epoch seconds of January 1st 00:00 UTC of `year`
pub fn year_anchor(year: i32) -> Option<i64> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp())
}

fn wrap_id(row_id: i64) -> u64 {
    row_id.rem_euclid(1 << ROW_ID_BITS) as u64
}

fn finite(field: &'static str, value: f64) -> Result<f64, EncodeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EncodeError::InvalidValue { field, value })
    }
}

fn heading_field(heading: f64) -> Result<u64, EncodeError> {
    let h = finite("heading", heading)?.rem_euclid(360.0);
    let scaled = (h * HEADING_SCALE).round() as u64;
    Ok(scaled % (360 * HEADING_SCALE as u64))
}

fn write_scaled(
    w: &mut BitWriter,
    field: &'static str,
    value: f64,
    scale: f64,
    bits: u32,
) -> Result<(), EncodeError> {
    let (negative, magnitude) = sign_magnitude(finite(field, value)?, scale, bits);
    w.write_signed(negative, magnitude, bits);
    Ok(())
}

fn write_coordinate(
    w: &mut BitWriter,
    field: &'static str,
    value: f64,
    limit: f64,
    bits: u32,
) -> Result<(), EncodeError> {
    if !value.is_finite() || value.abs() > limit {
        return Err(EncodeError::InvalidValue { field, value });
    }
    write_scaled(w, field, value, COORD_SCALE, bits)
}

/// Encode a STATUS segment
pub fn encode_status(row_id: i64, report: &StatusReport) -> Result<Vec<u8>, EncodeError> {
    let anchor = year_start(report.timestamp)?;
    let offset = (report.timestamp - anchor).floor() as u64;

    let mut w = BitWriter::with_capacity(STATUS_SEGMENT_LEN * 8);
    w.write(SegmentKind::Status as u64, KIND_BITS);
    w.write(wrap_id(row_id), ROW_ID_BITS);
    w.write(heading_field(report.heading)?, HEADING_BITS);
    w.write(saturate(offset, YEAR_OFFSET_BITS), YEAR_OFFSET_BITS);
    write_coordinate(&mut w, "latitude", report.latitude, 90.0, LAT_BITS)?;
    write_coordinate(&mut w, "longitude", report.longitude, 180.0, LON_BITS)?;

    let battery = finite("battery", report.battery)?.clamp(0.0, 100.0).round() as u64;
    w.write(battery, BATTERY_BITS);
    write_scaled(&mut w, "bus_voltage", report.bus_voltage, VOLTAGE_SCALE, VOLTAGE_BITS)?;
    write_scaled(
        &mut w,
        "temperature",
        report.temperature,
        TEMPERATURE_SCALE,
        TEMPERATURE_BITS,
    )?;
    write_scaled(&mut w, "pitch", report.pitch, ATTITUDE_SCALE, ATTITUDE_BITS)?;
    write_scaled(&mut w, "roll", report.roll, ATTITUDE_SCALE, ATTITUDE_BITS)?;

    w.write(wrap(report.wake_event_type as u64, WAKE_TYPE_BITS), WAKE_TYPE_BITS);
    w.write(wrap(report.wake_event_id as u64, WAKE_ID_BITS), WAKE_ID_BITS);
    w.write(wrap(report.wake_count as u64, WAKE_COUNT_BITS), WAKE_COUNT_BITS);

    let ix = &report.indices;
    for index in [ix.task, ix.trigger, ix.rule, ix.sensor, ix.node, ix.geofence] {
        w.write(wrap(index as u64, CONFIG_INDEX_BITS), CONFIG_INDEX_BITS);
    }
    w.write(wrap(report.flags as u64, FLAGS_BITS), FLAGS_BITS);

    let bytes = w.into_bytes();
    debug_assert_eq!(bytes.len(), STATUS_SEGMENT_LEN);
    Ok(bytes)
}

fn sample_bits(dtype: DataType, index: usize, value: f64) -> Result<u64, EncodeError> {
    let out_of_range = || EncodeError::SampleOutOfRange {
        index,
        dtype: dtype.name(),
        value,
    };
    if !value.is_finite() {
        return Err(out_of_range());
    }

    let rounded = value.round();
    match dtype {
        DataType::Uint8 => {
            if !(0.0..=u8::MAX as f64).contains(&rounded) {
                return Err(out_of_range());
            }
            Ok(rounded as u64)
        }
        DataType::Int16 => {
            if !(i16::MIN as f64..=i16::MAX as f64).contains(&rounded) {
                return Err(out_of_range());
            }
            Ok(rounded as i16 as u16 as u64)
        }
        DataType::Int32 => {
            if !(i32::MIN as f64..=i32::MAX as f64).contains(&rounded) {
                return Err(out_of_range());
            }
            Ok(rounded as i32 as u32 as u64)
        }
        DataType::Float32 => {
            let single = value as f32;
            if !single.is_finite() {
                return Err(out_of_range());
            }
            Ok(single.to_bits() as u64)
        }
    }
}

fn shape_field(field: &'static str, value: u32) -> Result<u64, EncodeError> {
    let value = value as u64;
    if value > max_value(SHAPE_BITS) {
        return Err(EncodeError::FieldOverflow {
            field,
            value,
            bits: SHAPE_BITS,
        });
    }
    Ok(value)
}

/// Encode a DATA segment
pub fn encode_data(segment: &DataSegment<'_>) -> Result<Vec<u8>, EncodeError> {
    let payload = segment.payload;

    let count = payload.item_count() as u64;
    if count > max_value(ITEM_COUNT_BITS) {
        return Err(EncodeError::FieldOverflow {
            field: "item_count",
            value: count,
            bits: ITEM_COUNT_BITS,
        });
    }
    let rows = shape_field("rows", payload.rows)?;
    let cols = shape_field("cols", payload.cols)?;

    let ts = finite("timestamp", segment.timestamp)?.floor();
    let status_ts = finite("status_timestamp", segment.status_timestamp)?.floor();
    let (behind, delta) = sign_magnitude(ts - status_ts, 1.0, TS_DELTA_BITS);

    let quality = finite("quality", segment.quality)?;
    let quality = (quality * QUALITY_SCALE).round().clamp(0.0, QUALITY_SCALE) as u64;

    let mut w = BitWriter::with_capacity(encoded_data_len(payload) * 8);
    w.write(SegmentKind::Data as u64, KIND_BITS);
    w.write(wrap_id(segment.row_id), ROW_ID_BITS);
    w.write(wrap_id(segment.status_row_id), ROW_ID_BITS);
    w.write(wrap(segment.node_code as u64, NODE_CODE_BITS), NODE_CODE_BITS);
    w.write(wrap(segment.instance as u64, INSTANCE_BITS), INSTANCE_BITS);
    w.write(wrap(segment.sequence as u64, SEQUENCE_BITS), SEQUENCE_BITS);
    w.write(segment.variant as u64, 1);
    w.write_signed(behind, delta, TS_DELTA_BITS);
    w.write(heading_field(segment.heading)?, HEADING_BITS);
    w.write(quality, QUALITY_BITS);
    w.write(payload.dtype as u64, DTYPE_BITS);
    w.write(count, ITEM_COUNT_BITS);
    w.write(rows, SHAPE_BITS);
    w.write(cols, SHAPE_BITS);

    let width = payload.dtype.bit_width();
    for (index, &value) in payload.values.iter().enumerate() {
        w.write(sample_bits(payload.dtype, index, value)?, width);
    }

    let bytes = w.into_bytes();
    debug_assert_eq!(bytes.len(), encoded_data_len(payload));
    Ok(bytes)
}

/// Encode a status report and append it to `message`
///
/// Returns the number of bytes appended. On any error the message is
/// left exactly as it was.
pub fn pack_status(
    message: &mut OutgoingMessage,
    row_id: i64,
    report: &StatusReport,
) -> Result<usize, EncodeError> {
    let bytes = encode_status(row_id, report)?;
    message.try_append(&bytes)?;
    log::trace!("packed status {} ({} bytes)", row_id, bytes.len());
    Ok(bytes.len())
}

/// Encode a data segment and append it to `message`
///
/// Returns the number of bytes appended. On any error the message is
/// left exactly as it was.
pub fn pack_data(
    message: &mut OutgoingMessage,
    segment: &DataSegment<'_>,
) -> Result<usize, EncodeError> {
    let needed = encoded_data_len(segment.payload);
    if !message.fits(needed) {
        return Err(EncodeError::Capacity {
            needed,
            available: message.remaining(),
        });
    }
    let bytes = encode_data(segment)?;
    message.try_append(&bytes)?;
    log::trace!("packed data {} ({} bytes)", segment.row_id, bytes.len());
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConfigIndices, PayloadVariant};

    // 2024-03-01T00:00:00Z
    const MARCH_2024: f64 = 1_709_251_200.0;

    fn test_report() -> StatusReport {
        StatusReport {
            timestamp: MARCH_2024 + 0.75,
            latitude: 47.6062,
            longitude: -122.3321,
            heading: 271.25,
            battery: 88.0,
            bus_voltage: 12.34,
            temperature: -3.5,
            pitch: 2.5,
            roll: -1.25,
            wake_event_type: 0,
            wake_event_id: 3,
            wake_count: 4100,
            indices: ConfigIndices {
                task: 1,
                trigger: 2,
                rule: 3,
                sensor: 4,
                node: 5,
                geofence: 17,
            },
            flags: 0b1010_0101,
        }
    }

    fn test_segment(payload: &Payload) -> DataSegment<'_> {
        DataSegment {
            row_id: 7,
            status_row_id: 3,
            status_timestamp: MARCH_2024,
            node_code: 9,
            instance: 1,
            sequence: 12,
            timestamp: MARCH_2024 - 30.0,
            heading: 90.0,
            quality: 0.8,
            variant: PayloadVariant::Standard,
            payload,
        }
    }

    #[test]
    fn test_year_start() {
        // 2024-01-01T00:00:00Z
        assert_eq!(year_start(MARCH_2024).unwrap(), 1_704_067_200.0);
        assert_eq!(year_anchor(2024), Some(1_704_067_200));
        assert!(year_start(f64::NAN).is_err());
        assert!(year_start(-1.0).is_err());
    }

    #[test]
    fn test_status_length() {
        let bytes = encode_status(1, &test_report()).unwrap();
        assert_eq!(bytes.len(), STATUS_SEGMENT_LEN);
        // kind tag in the top 3 bits
        assert_eq!(bytes[0] >> 5, SegmentKind::Status as u8);
    }

    #[test]
    fn test_status_row_id_wraps() {
        let a = encode_status(5, &test_report()).unwrap();
        let b = encode_status(5 + 4096, &test_report()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_status_rejects_bad_coordinates() {
        let mut report = test_report();
        report.latitude = 91.0;
        assert!(matches!(
            encode_status(1, &report),
            Err(EncodeError::InvalidValue {
                field: "latitude",
                ..
            })
        ));

        let mut report = test_report();
        report.longitude = f64::NAN;
        assert!(encode_status(1, &report).is_err());
    }

    #[test]
    fn test_data_length() {
        let payload = Payload::new(DataType::Int16, vec![1.0, -2.0, 300.0]);
        let bytes = encode_data(&test_segment(&payload)).unwrap();
        assert_eq!(bytes.len(), DATA_HEADER_LEN + 6);
        assert_eq!(bytes.len(), encoded_data_len(&payload));
        assert_eq!(bytes[0] >> 5, SegmentKind::Data as u8);
    }

    #[test]
    fn test_data_sample_out_of_range() {
        let payload = Payload::new(DataType::Uint8, vec![10.0, 256.0]);
        assert!(matches!(
            encode_data(&test_segment(&payload)),
            Err(EncodeError::SampleOutOfRange { index: 1, .. })
        ));

        let payload = Payload::new(DataType::Float32, vec![f64::MAX]);
        assert!(encode_data(&test_segment(&payload)).is_err());
    }

    #[test]
    fn test_data_item_count_overflow() {
        let payload = Payload::new(DataType::Uint8, vec![0.0; 4096]);
        assert!(matches!(
            encode_data(&test_segment(&payload)),
            Err(EncodeError::FieldOverflow {
                field: "item_count",
                ..
            })
        ));
    }

    #[test]
    fn test_data_shape_overflow() {
        let payload = Payload::with_shape(DataType::Uint8, 300, 1, vec![0.0; 4]);
        assert!(matches!(
            encode_data(&test_segment(&payload)),
            Err(EncodeError::FieldOverflow { field: "rows", .. })
        ));
    }

    #[test]
    fn test_pack_capacity_failure_does_not_mutate() {
        let payload = Payload::new(DataType::Int32, vec![1.0; 10]);
        let seg_len = encoded_data_len(&payload);

        let mut msg = OutgoingMessage::new(STATUS_SEGMENT_LEN + seg_len - 1);
        pack_status(&mut msg, 1, &test_report()).unwrap();
        let before = msg.as_bytes().to_vec();

        let err = pack_data(&mut msg, &test_segment(&payload)).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(msg.as_bytes(), &before[..]);
    }

    #[test]
    fn test_pack_format_failure_does_not_mutate() {
        let payload = Payload::new(DataType::Uint8, vec![-1.0]);
        let mut msg = OutgoingMessage::new(340);
        let err = pack_data(&mut msg, &test_segment(&payload)).unwrap_err();
        assert!(!err.is_capacity());
        assert!(msg.is_empty());
    }
}
