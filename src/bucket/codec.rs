//! Slot encoding and decoding.
//!
//! Slots are packed little-endian with no alignment padding; each field
//! lives at the offset its [`Schema`] computed at freeze time. String
//! fields store their 12-byte `(offset, length)` heap handle in place.
//! DateTime and TimeSpan travel as 64-bit tick counts (100 ns units;
//! DateTime ticks count from 0001-01-01T00:00:00Z). Guids are written in
//! RFC 4122 big-endian byte order, the order `Uuid::as_bytes` yields, so
//! files are portable across hosts.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    error::Result,
    heap::{StringHandle, StringHeap},
    schema::{FieldType, FieldValue, Schema},
    Error,
};

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
pub(crate) const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// 100-nanosecond intervals per second.
pub(crate) const TICKS_PER_SECOND: i64 = 10_000_000;

pub(crate) fn datetime_to_ticks(value: &DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS
        + value.timestamp() * TICKS_PER_SECOND
        + i64::from(value.timestamp_subsec_nanos()) / 100
}

pub(crate) fn ticks_to_datetime(ticks: i64) -> Result<DateTime<Utc>> {
    let relative = ticks - UNIX_EPOCH_TICKS;
    let seconds = relative.div_euclid(TICKS_PER_SECOND);
    let nanos = (relative.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(seconds, nanos).ok_or_else(|| Error::Corruption {
        reason: format!("tick count {ticks} is outside the representable DateTime range"),
    })
}

pub(crate) fn duration_to_ticks(value: &Duration) -> i64 {
    value.num_seconds() * TICKS_PER_SECOND + i64::from(value.subsec_nanos()) / 100
}

pub(crate) fn ticks_to_duration(ticks: i64) -> Duration {
    Duration::seconds(ticks / TICKS_PER_SECOND)
        + Duration::nanoseconds((ticks % TICKS_PER_SECOND) * 100)
}

/// Checks one row against the schema before any slot is provisioned, so an
/// append that already advanced the header cannot fail on a bad value.
/// Applies the same coercion rules as [`encode_slot`].
pub(crate) fn validate_row(schema: &Schema, row: &[FieldValue]) -> Result<()> {
    if row.len() != schema.fields().len() {
        return Err(Error::Schema {
            reason: format!(
                "record carries {} values but the schema has {} fields",
                row.len(),
                schema.fields().len()
            ),
        });
    }

    for (field, value) in schema.fields().iter().zip(row) {
        let ok = matches!(
            (field.ty(), value),
            (FieldType::Int32, FieldValue::Int32(_))
                | (FieldType::Int64, FieldValue::Int64(_) | FieldValue::Int32(_))
                | (FieldType::Single, FieldValue::Single(_))
                | (
                    FieldType::Double,
                    FieldValue::Double(_) | FieldValue::Single(_) | FieldValue::Int32(_)
                )
                | (FieldType::Boolean, FieldValue::Boolean(_))
                | (FieldType::DateTime, FieldValue::DateTime(_))
                | (FieldType::TimeSpan, FieldValue::TimeSpan(_))
                | (FieldType::Guid, FieldValue::Guid(_))
                | (FieldType::String, FieldValue::String(_) | FieldValue::Null)
                | (FieldType::FixedBytes(_), FieldValue::Bytes(_))
        );
        if !ok {
            return Err(Error::Type {
                field: field.name().to_string(),
                expected: field.ty().name(),
                actual: value.kind_name(),
            });
        }
        if let (FieldType::FixedBytes(n), FieldValue::Bytes(bytes)) = (field.ty(), value) {
            if bytes.len() > n as usize {
                return Err(Error::Schema {
                    reason: format!(
                        "payload of {} bytes exceeds fixed length {} of field '{}'",
                        bytes.len(),
                        n,
                        field.name()
                    ),
                });
            }
        }
    }

    Ok(())
}

/// Encodes one validated row into `slot`. `handles` carries one heap handle
/// per `String` field, in schema order; `slot` must be zeroed and exactly
/// `schema.slot_size()` long.
pub(crate) fn encode_slot(
    schema: &Schema,
    row: &[FieldValue],
    handles: &[StringHandle],
    slot: &mut [u8],
) -> Result<()> {
    debug_assert_eq!(slot.len(), schema.slot_size());

    let mut next_handle = 0usize;
    for (field, value) in schema.fields().iter().zip(row) {
        let at = field.offset();
        match (field.ty(), value) {
            (FieldType::Int32, FieldValue::Int32(v)) => {
                slot[at..at + 4].copy_from_slice(&v.to_le_bytes());
            }
            (FieldType::Int64, FieldValue::Int64(v)) => {
                slot[at..at + 8].copy_from_slice(&v.to_le_bytes());
            }
            (FieldType::Int64, FieldValue::Int32(v)) => {
                slot[at..at + 8].copy_from_slice(&i64::from(*v).to_le_bytes());
            }
            (FieldType::Single, FieldValue::Single(v)) => {
                slot[at..at + 4].copy_from_slice(&v.to_le_bytes());
            }
            (FieldType::Double, FieldValue::Double(v)) => {
                slot[at..at + 8].copy_from_slice(&v.to_le_bytes());
            }
            (FieldType::Double, FieldValue::Single(v)) => {
                slot[at..at + 8].copy_from_slice(&f64::from(*v).to_le_bytes());
            }
            (FieldType::Double, FieldValue::Int32(v)) => {
                slot[at..at + 8].copy_from_slice(&f64::from(*v).to_le_bytes());
            }
            (FieldType::Boolean, FieldValue::Boolean(v)) => {
                slot[at] = u8::from(*v);
            }
            (FieldType::DateTime, FieldValue::DateTime(v)) => {
                slot[at..at + 8].copy_from_slice(&datetime_to_ticks(v).to_le_bytes());
            }
            (FieldType::TimeSpan, FieldValue::TimeSpan(v)) => {
                slot[at..at + 8].copy_from_slice(&duration_to_ticks(v).to_le_bytes());
            }
            (FieldType::Guid, FieldValue::Guid(v)) => {
                slot[at..at + 16].copy_from_slice(v.as_bytes());
            }
            (FieldType::String, FieldValue::String(_) | FieldValue::Null) => {
                let handle = handles[next_handle];
                next_handle += 1;
                slot[at..at + 8].copy_from_slice(&handle.offset.to_le_bytes());
                slot[at + 8..at + 12].copy_from_slice(&handle.len.to_le_bytes());
            }
            (FieldType::FixedBytes(_), FieldValue::Bytes(bytes)) => {
                // Shorter payloads keep the zeroed tail as padding.
                slot[at..at + bytes.len()].copy_from_slice(bytes);
            }
            _ => {
                return Err(Error::Type {
                    field: field.name().to_string(),
                    expected: field.ty().name(),
                    actual: value.kind_name(),
                })
            }
        }
    }

    Ok(())
}

/// Decodes one slot back into a row, loading string payloads from `heap`.
pub(crate) fn decode_slot(schema: &Schema, slot: &[u8], heap: &StringHeap) -> Result<Vec<FieldValue>> {
    debug_assert_eq!(slot.len(), schema.slot_size());

    let mut row = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let at = field.offset();
        let value = match field.ty() {
            FieldType::Int32 => FieldValue::Int32(i32::from_le_bytes(
                slot[at..at + 4].try_into().expect("4-byte field"),
            )),
            FieldType::Int64 => FieldValue::Int64(i64::from_le_bytes(
                slot[at..at + 8].try_into().expect("8-byte field"),
            )),
            FieldType::Single => FieldValue::Single(f32::from_le_bytes(
                slot[at..at + 4].try_into().expect("4-byte field"),
            )),
            FieldType::Double => FieldValue::Double(f64::from_le_bytes(
                slot[at..at + 8].try_into().expect("8-byte field"),
            )),
            FieldType::Boolean => FieldValue::Boolean(slot[at] != 0),
            FieldType::DateTime => {
                let ticks =
                    i64::from_le_bytes(slot[at..at + 8].try_into().expect("8-byte field"));
                FieldValue::DateTime(ticks_to_datetime(ticks)?)
            }
            FieldType::TimeSpan => {
                let ticks =
                    i64::from_le_bytes(slot[at..at + 8].try_into().expect("8-byte field"));
                FieldValue::TimeSpan(ticks_to_duration(ticks))
            }
            FieldType::Guid => FieldValue::Guid(Uuid::from_bytes(
                slot[at..at + 16].try_into().expect("16-byte field"),
            )),
            FieldType::String => {
                let handle = StringHandle {
                    offset: i64::from_le_bytes(
                        slot[at..at + 8].try_into().expect("8-byte offset"),
                    ),
                    len: i32::from_le_bytes(
                        slot[at + 8..at + 12].try_into().expect("4-byte length"),
                    ),
                };
                FieldValue::String(heap.load(handle)?)
            }
            FieldType::FixedBytes(n) => FieldValue::Bytes(slot[at..at + n as usize].to_vec()),
        };
        row.push(value);
    }

    Ok(row)
}

/// Borrows the payload bytes of every `String` field of `row`, in schema
/// order. `Null` and empty strings contribute empty payloads, which the
/// heap maps to the empty handle.
pub(crate) fn string_payloads<'a>(schema: &Schema, row: &'a [FieldValue]) -> Vec<&'a [u8]> {
    schema
        .fields()
        .iter()
        .zip(row)
        .filter(|(field, _)| field.ty() == FieldType::String)
        .map(|(_, value)| match value {
            FieldValue::String(s) => s.as_bytes(),
            _ => &[][..],
        })
        .collect()
}
