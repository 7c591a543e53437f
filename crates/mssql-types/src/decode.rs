//! TDS wire decoding of SQL values.
//!
//! Decoding happens in two steps. [`read_value_bytes`] applies the length
//! convention of the descriptor and slices out exactly the bytes of one
//! value (or reports NULL). [`decode_payload`] then interprets those bytes
//! and fails if any are left over, so a malformed value can never shift the
//! cursor for the columns after it.

use bytes::{Bytes, BytesMut};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::collation::Collation;
use crate::cursor::WireCursor;
use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::type_id::{LengthKind, TypeId};
use crate::type_info::{MAX_TIME_SCALE, TypeInfo, time_width};
use crate::value::SqlValue;

/// PLP total length announcing a NULL value.
pub const PLP_NULL: u64 = u64::MAX;

/// PLP total length announcing a value of unknown size.
pub const PLP_UNKNOWN_LENGTH: u64 = u64::MAX - 1;

/// Days from 0001-01-01 to 1900-01-01, the DATETIME epoch.
pub(crate) const DAYS_TO_1900: i64 = 693_595;

/// Days from 0001-01-01 to 9999-12-31.
pub(crate) const MAX_DAYS: i64 = 3_652_058;

/// DATETIME ticks per second.
pub(crate) const DATETIME_TICKS_PER_SECOND: u64 = 300;

pub(crate) const NANOS_PER_SECOND: u64 = 1_000_000_000;

pub(crate) const SECONDS_PER_DAY: u64 = 86_400;

/// Trait for types that decode themselves straight from the wire.
pub trait TdsDecode: Sized {
    /// Decode one value described by `type_info`.
    fn decode(cursor: &mut WireCursor, type_info: &TypeInfo) -> Result<Self, TypeError>;
}

impl TdsDecode for SqlValue {
    fn decode(cursor: &mut WireCursor, type_info: &TypeInfo) -> Result<Self, TypeError> {
        decode_value(cursor, type_info)
    }
}

/// Decode one value, advancing the cursor by exactly its wire length.
pub fn decode_value(cursor: &mut WireCursor, type_info: &TypeInfo) -> Result<SqlValue, TypeError> {
    match read_value_bytes(cursor, type_info)? {
        Some(payload) => decode_payload(type_info, payload),
        None => Ok(SqlValue::Null),
    }
}

/// Consume the length prefix and body of one value.
///
/// Returns `None` for NULL.
pub fn read_value_bytes(
    cursor: &mut WireCursor,
    type_info: &TypeInfo,
) -> Result<Option<Bytes>, TypeError> {
    match type_info.length_kind() {
        LengthKind::Fixed(0) => Ok(None),
        LengthKind::Fixed(size) => cursor.take(size).map(Some),
        LengthKind::Byte => match cursor.read_u8()? {
            0 => Ok(None),
            len => cursor.take(len as usize).map(Some),
        },
        LengthKind::UShort => match cursor.read_u16_le()? {
            0xFFFF => Ok(None),
            len => cursor.take(len as usize).map(Some),
        },
        LengthKind::Long => match cursor.read_u32_le()? {
            0 => Ok(None),
            len => cursor.take(len as usize).map(Some),
        },
        LengthKind::TextPtr => {
            let ptr_len = cursor.read_u8()?;
            if ptr_len == 0 {
                return Ok(None);
            }
            cursor.skip(ptr_len as usize)?;
            cursor.skip(8)?; // timestamp
            let len = cursor.read_u32_le()?;
            cursor.take(len as usize).map(Some)
        }
        LengthKind::Plp => read_plp(cursor),
    }
}

/// Reassemble a PLP value from its chunks.
fn read_plp(cursor: &mut WireCursor) -> Result<Option<Bytes>, TypeError> {
    let total = cursor.read_u64_le()?;
    if total == PLP_NULL {
        return Ok(None);
    }

    let mut data = BytesMut::new();
    loop {
        let chunk_len = cursor.read_u32_le()? as usize;
        if chunk_len == 0 {
            break;
        }
        data.extend_from_slice(&cursor.take(chunk_len)?);
    }

    if total != PLP_UNKNOWN_LENGTH && total != data.len() as u64 {
        return Err(TypeError::InvalidLength {
            type_name: "PLP value",
            length: data.len(),
        });
    }
    Ok(Some(data.freeze()))
}

fn invalid(type_name: &'static str, length: usize) -> TypeError {
    TypeError::InvalidLength { type_name, length }
}

/// Interpret the exact bytes of one non-NULL value.
pub fn decode_payload(type_info: &TypeInfo, data: Bytes) -> Result<SqlValue, TypeError> {
    match type_info.type_id {
        TypeId::Null => Ok(SqlValue::Null),
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => decode_int(data),
        TypeId::Bit | TypeId::BitN => decode_bit(data),
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => decode_float(data),
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => decode_money(data),
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => decode_legacy_datetime(data),
        TypeId::Guid => decode_guid(data),
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            decode_decimal(data, type_info.scale)
        }
        TypeId::Date => {
            let mut cursor = WireCursor::new(data);
            let date = read_date(&mut cursor)?;
            cursor.finish()?;
            Ok(SqlValue::Date(date))
        }
        TypeId::Time => decode_time(data, type_info.scale),
        TypeId::DateTime2 => decode_datetime2(data, type_info.scale),
        TypeId::DateTimeOffset => decode_datetimeoffset(data, type_info.scale),
        TypeId::BigVarChar | TypeId::BigChar | TypeId::Text => {
            decode_varchar(&data, type_info.collation_or_default())
        }
        TypeId::NVarChar | TypeId::NChar | TypeId::NText => {
            decode_utf16_string(&data).map(SqlValue::String)
        }
        TypeId::BigVarBinary | TypeId::BigBinary | TypeId::Image | TypeId::Udt => {
            Ok(SqlValue::Binary(data))
        }
        TypeId::Xml => decode_utf16_string(&data).map(SqlValue::Xml),
        TypeId::Variant => decode_variant(data),
    }
}

fn decode_int(data: Bytes) -> Result<SqlValue, TypeError> {
    let len = data.len();
    let mut cursor = WireCursor::new(data);
    let value = match len {
        1 => SqlValue::TinyInt(cursor.read_u8()?),
        2 => SqlValue::SmallInt(cursor.read_i16_le()?),
        4 => SqlValue::Int(cursor.read_i32_le()?),
        8 => SqlValue::BigInt(cursor.read_i64_le()?),
        _ => return Err(invalid("int", len)),
    };
    Ok(value)
}

fn decode_bit(data: Bytes) -> Result<SqlValue, TypeError> {
    match data[..] {
        [b] => Ok(SqlValue::Bool(b != 0)),
        _ => Err(invalid("bit", data.len())),
    }
}

fn decode_float(data: Bytes) -> Result<SqlValue, TypeError> {
    let len = data.len();
    let mut cursor = WireCursor::new(data);
    match len {
        4 => Ok(SqlValue::Float(cursor.read_f32_le()?)),
        8 => Ok(SqlValue::Double(cursor.read_f64_le()?)),
        _ => Err(invalid("float", len)),
    }
}

fn decode_money(data: Bytes) -> Result<SqlValue, TypeError> {
    let len = data.len();
    let mut cursor = WireCursor::new(data);
    let units = match len {
        8 => {
            let high = i64::from(cursor.read_i32_le()?);
            let low = i64::from(cursor.read_u32_le()?);
            (high << 32) | low
        }
        4 => i64::from(cursor.read_i32_le()?),
        _ => return Err(invalid("money", len)),
    };
    Ok(SqlValue::Decimal(Decimal::new(units, 4)))
}

/// Date from a day count since 0001-01-01.
pub(crate) fn date_from_days(days: i64) -> Result<NaiveDate, TypeError> {
    i32::try_from(days + 1)
        .ok()
        .filter(|_| (0..=MAX_DAYS).contains(&days))
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("day {days} out of range")))
}

fn decode_legacy_datetime(data: Bytes) -> Result<SqlValue, TypeError> {
    let len = data.len();
    let mut cursor = WireCursor::new(data);
    let (days, nanos) = match len {
        8 => {
            let days = i64::from(cursor.read_i32_le()?);
            let ticks = u64::from(cursor.read_u32_le()?);
            if ticks >= DATETIME_TICKS_PER_SECOND * SECONDS_PER_DAY {
                return Err(TypeError::InvalidDateTime(format!("{ticks} ticks")));
            }
            (days, ticks * NANOS_PER_SECOND / DATETIME_TICKS_PER_SECOND)
        }
        4 => {
            let days = i64::from(cursor.read_u16_le()?);
            let minutes = u64::from(cursor.read_u16_le()?);
            (days, minutes * 60 * NANOS_PER_SECOND)
        }
        _ => return Err(invalid("datetime", len)),
    };

    let date = date_from_days(DAYS_TO_1900 + days)?;
    let time = time_from_nanos(nanos)?;
    Ok(SqlValue::DateTime(date.and_time(time)))
}

fn decode_guid(data: Bytes) -> Result<SqlValue, TypeError> {
    let bytes: [u8; 16] = data[..]
        .try_into()
        .map_err(|_| invalid("uniqueidentifier", data.len()))?;
    Ok(SqlValue::Uuid(Uuid::from_bytes_le(bytes)))
}

fn decode_decimal(data: Bytes, scale: u8) -> Result<SqlValue, TypeError> {
    let len = data.len();
    if !matches!(len, 5 | 9 | 13 | 17) {
        return Err(invalid("decimal", len));
    }
    let positive = data[0] == 1;
    let mut magnitude = [0u8; 16];
    magnitude[..len - 1].copy_from_slice(&data[1..]);
    let magnitude = i128::try_from(u128::from_le_bytes(magnitude))
        .map_err(|_| TypeError::OutOfRange { target_type: "decimal" })?;
    let value = Numeric::new(if positive { magnitude } else { -magnitude }, scale)
        .map_err(|_| TypeError::OutOfRange { target_type: "decimal" })?;
    Ok(value.to_decimal().map_or(SqlValue::Numeric(value), SqlValue::Decimal))
}

fn read_date(cursor: &mut WireCursor) -> Result<NaiveDate, TypeError> {
    let raw = cursor.take(3)?;
    let days = i64::from(raw[0]) | (i64::from(raw[1]) << 8) | (i64::from(raw[2]) << 16);
    date_from_days(days)
}

/// Nanoseconds per tick at the given scale.
pub(crate) fn nanos_per_tick(scale: u8) -> u64 {
    10u64.pow(9 - u32::from(scale.min(MAX_TIME_SCALE)))
}

pub(crate) fn time_from_nanos(nanos: u64) -> Result<NaiveTime, TypeError> {
    let secs = u32::try_from(nanos / NANOS_PER_SECOND)
        .map_err(|_| TypeError::InvalidDateTime(format!("{nanos}ns past midnight")))?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, (nanos % NANOS_PER_SECOND) as u32)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{nanos}ns past midnight")))
}

fn read_time(cursor: &mut WireCursor, scale: u8) -> Result<NaiveTime, TypeError> {
    let raw = cursor.take(time_width(scale))?;
    let mut ticks = [0u8; 8];
    ticks[..raw.len()].copy_from_slice(&raw);
    let nanos = u64::from_le_bytes(ticks)
        .checked_mul(nanos_per_tick(scale))
        .ok_or_else(|| TypeError::InvalidDateTime("time overflow".to_owned()))?;
    time_from_nanos(nanos)
}

fn expect_len(type_name: &'static str, data: &Bytes, expected: usize) -> Result<(), TypeError> {
    if data.len() != expected {
        return Err(invalid(type_name, data.len()));
    }
    Ok(())
}

fn decode_time(data: Bytes, scale: u8) -> Result<SqlValue, TypeError> {
    expect_len("time", &data, time_width(scale))?;
    let mut cursor = WireCursor::new(data);
    Ok(SqlValue::Time(read_time(&mut cursor, scale)?))
}

fn decode_datetime2(data: Bytes, scale: u8) -> Result<SqlValue, TypeError> {
    expect_len("datetime2", &data, time_width(scale) + 3)?;
    let mut cursor = WireCursor::new(data);
    let time = read_time(&mut cursor, scale)?;
    let date = read_date(&mut cursor)?;
    Ok(SqlValue::DateTime(NaiveDateTime::new(date, time)))
}

fn decode_datetimeoffset(data: Bytes, scale: u8) -> Result<SqlValue, TypeError> {
    expect_len("datetimeoffset", &data, time_width(scale) + 5)?;
    let mut cursor = WireCursor::new(data);
    let time = read_time(&mut cursor, scale)?;
    let date = read_date(&mut cursor)?;
    let offset_minutes = cursor.read_i16_le()?;

    let offset = FixedOffset::east_opt(i32::from(offset_minutes) * 60)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("offset {offset_minutes} minutes")))?;
    // Date and time are stored in UTC.
    let utc = NaiveDateTime::new(date, time);
    Ok(SqlValue::DateTimeOffset(offset.from_utc_datetime(&utc)))
}

fn decode_varchar(data: &[u8], collation: Collation) -> Result<SqlValue, TypeError> {
    if collation.is_utf8() {
        return std::str::from_utf8(data)
            .map(|s| SqlValue::String(s.to_owned()))
            .map_err(|e| TypeError::InvalidEncoding(e.to_string()));
    }
    let (text, _had_errors) = collation.encoding().decode_without_bom_handling(data);
    Ok(SqlValue::String(text.into_owned()))
}

/// Rebuild the descriptor of a `sql_variant` base type from its properties.
fn variant_type_info(base: TypeId, props: Bytes) -> Result<TypeInfo, TypeError> {
    let mut cursor = WireCursor::new(props);
    let mut info = TypeInfo::new(base);
    match base {
        TypeId::DecimalN | TypeId::NumericN => {
            info.precision = cursor.read_u8()?;
            info.scale = cursor.read_u8()?;
        }
        TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
            info.scale = cursor.read_u8()?;
        }
        TypeId::BigVarBinary | TypeId::BigBinary => {
            info.max_length = u32::from(cursor.read_u16_le()?);
        }
        TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
            info.collation = Some(Collation::decode(&mut cursor)?);
            info.max_length = u32::from(cursor.read_u16_le()?);
        }
        _ => {}
    }
    cursor.finish()?;
    Ok(info)
}

fn decode_variant(data: Bytes) -> Result<SqlValue, TypeError> {
    let mut cursor = WireCursor::new(data);
    let base_byte = cursor.read_u8()?;
    let base = TypeId::from_u8(base_byte).ok_or(TypeError::UnsupportedType(base_byte))?;
    if matches!(base, TypeId::Variant | TypeId::Xml | TypeId::Udt) {
        return Err(TypeError::UnsupportedType(base_byte));
    }
    let prop_len = cursor.read_u8()? as usize;
    let info = variant_type_info(base, cursor.take(prop_len)?)?;
    decode_payload(&info, cursor.take_rest())
}

/// Decode a UTF-16LE string from bytes.
pub fn decode_utf16_string(data: &[u8]) -> Result<String, TypeError> {
    if data.len() % 2 != 0 {
        return Err(TypeError::InvalidEncoding(
            "UTF-16 data must have even length".to_string(),
        ));
    }

    let utf16: Vec<u16> = data
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    String::from_utf16(&utf16).map_err(|e| TypeError::InvalidEncoding(e.to_string()))
}
