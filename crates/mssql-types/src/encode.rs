//! TDS wire encoding of SQL values.
//!
//! The inverse of [`crate::decode`], used for RPC parameters. A value that
//! does not fit its descriptor is rejected before anything is written to the
//! output buffer.

use bytes::{BufMut, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::collation::Collation;
use crate::decode::{
    DATETIME_TICKS_PER_SECOND, DAYS_TO_1900, MAX_DAYS, NANOS_PER_SECOND, PLP_NULL,
    SECONDS_PER_DAY, nanos_per_tick,
};
use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::type_id::{LengthKind, TypeId};
use crate::type_info::{MAX_PRECISION, MAX_USHORT_LENGTH, TypeInfo, decimal_width, time_width};
use crate::value::SqlValue;

/// Trait for values that can be written under a type descriptor.
pub trait TdsEncode {
    /// Write this value, including its length prefix, into `dst`.
    fn encode(&self, type_info: &TypeInfo, dst: &mut BytesMut) -> Result<(), TypeError>;
}

impl TdsEncode for SqlValue {
    fn encode(&self, type_info: &TypeInfo, dst: &mut BytesMut) -> Result<(), TypeError> {
        encode_value(type_info, self, dst)
    }
}

/// Encode one value with the length convention of `type_info`.
pub fn encode_value(
    type_info: &TypeInfo,
    value: &SqlValue,
    dst: &mut BytesMut,
) -> Result<(), TypeError> {
    if value.is_null() {
        return encode_null(type_info, dst);
    }
    let payload = encode_payload(type_info, value)?;
    write_framed(type_info, &payload, dst)
}

fn encode_null(type_info: &TypeInfo, dst: &mut BytesMut) -> Result<(), TypeError> {
    match type_info.length_kind() {
        LengthKind::Fixed(0) => {}
        LengthKind::Fixed(_) => return Err(mismatch(type_info, &SqlValue::Null)),
        LengthKind::Byte | LengthKind::TextPtr => dst.put_u8(0),
        LengthKind::UShort => dst.put_u16_le(0xFFFF),
        LengthKind::Long => dst.put_u32_le(0),
        LengthKind::Plp => dst.put_u64_le(PLP_NULL),
    }
    Ok(())
}

fn write_framed(type_info: &TypeInfo, payload: &[u8], dst: &mut BytesMut) -> Result<(), TypeError> {
    let len = payload.len();
    match type_info.length_kind() {
        LengthKind::Fixed(_) => {}
        LengthKind::Byte => {
            let len = u8::try_from(len).map_err(|_| too_long(type_info, len))?;
            dst.put_u8(len);
        }
        LengthKind::UShort => {
            if len > type_info.max_length as usize {
                return Err(too_long(type_info, len));
            }
            dst.put_u16_le(len as u16);
        }
        LengthKind::Long => {
            if len > type_info.max_length as usize {
                return Err(too_long(type_info, len));
            }
            dst.put_u32_le(len as u32);
        }
        LengthKind::Plp => {
            dst.put_u64_le(len as u64);
            if len > 0 {
                dst.put_u32_le(len as u32);
                dst.put_slice(payload);
            }
            dst.put_u32_le(0);
            return Ok(());
        }
        LengthKind::TextPtr => return Err(TypeError::UnsupportedType(type_info.type_id as u8)),
    }
    dst.put_slice(payload);
    Ok(())
}

fn mismatch(type_info: &TypeInfo, value: &SqlValue) -> TypeError {
    TypeError::TypeMismatch {
        expected: type_info.type_id.name(),
        actual: value.type_name().to_owned(),
    }
}

fn too_long(type_info: &TypeInfo, len: usize) -> TypeError {
    TypeError::Truncation(format!(
        "{len} bytes exceed {} declared as {}",
        type_info.type_id.name(),
        type_info.max_length
    ))
}

fn out_of_range(type_info: &TypeInfo) -> TypeError {
    TypeError::OutOfRange {
        target_type: type_info.type_id.name(),
    }
}

/// Encode the bytes of one non-NULL value, without a length prefix.
pub fn encode_payload(type_info: &TypeInfo, value: &SqlValue) -> Result<Vec<u8>, TypeError> {
    let wrong = || mismatch(type_info, value);
    match type_info.type_id {
        TypeId::Null => Err(wrong()),
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => {
            let width = type_info.type_id.fixed_size().unwrap_or(type_info.max_length as usize);
            let v = value.as_i64().ok_or_else(wrong)?;
            encode_int(type_info, v, width)
        }
        TypeId::Bit | TypeId::BitN => Ok(vec![u8::from(value.as_bool().ok_or_else(wrong)?)]),
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => {
            let width = type_info.type_id.fixed_size().unwrap_or(type_info.max_length as usize);
            encode_float(type_info, value, width)
        }
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => {
            let width = type_info.type_id.fixed_size().unwrap_or(type_info.max_length as usize);
            encode_money(type_info, value.as_numeric().ok_or_else(wrong)?, width)
        }
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => {
            let width = type_info.type_id.fixed_size().unwrap_or(type_info.max_length as usize);
            encode_legacy_datetime(type_info, value.as_datetime().ok_or_else(wrong)?, width)
        }
        TypeId::Guid => Ok(value.as_uuid().ok_or_else(wrong)?.to_bytes_le().to_vec()),
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            encode_decimal(type_info, value.as_numeric().ok_or_else(wrong)?)
        }
        TypeId::Date => {
            let mut out = Vec::with_capacity(3);
            write_date(&mut out, value.as_date().ok_or_else(wrong)?)?;
            Ok(out)
        }
        TypeId::Time => {
            let SqlValue::Time(time) = value else {
                return Err(wrong());
            };
            let mut out = Vec::with_capacity(5);
            write_time(&mut out, *time, type_info.scale)?;
            Ok(out)
        }
        TypeId::DateTime2 => {
            let datetime = value.as_datetime().ok_or_else(wrong)?;
            let mut out = Vec::with_capacity(8);
            write_time(&mut out, datetime.time(), type_info.scale)?;
            write_date(&mut out, datetime.date())?;
            Ok(out)
        }
        TypeId::DateTimeOffset => {
            let SqlValue::DateTimeOffset(dto) = value else {
                return Err(wrong());
            };
            let offset_secs = dto.offset().local_minus_utc();
            if offset_secs % 60 != 0 {
                return Err(TypeError::Truncation(format!(
                    "offset of {offset_secs}s is not whole minutes"
                )));
            }
            let utc = dto.naive_utc();
            let mut out = Vec::with_capacity(10);
            write_time(&mut out, utc.time(), type_info.scale)?;
            write_date(&mut out, utc.date())?;
            out.extend_from_slice(&((offset_secs / 60) as i16).to_le_bytes());
            Ok(out)
        }
        TypeId::BigVarChar | TypeId::BigChar | TypeId::Text => {
            let text = value.as_str().ok_or_else(wrong)?;
            encode_varchar(text, type_info.collation_or_default())
        }
        TypeId::NVarChar | TypeId::NChar | TypeId::NText | TypeId::Xml => {
            let text = value.as_str().ok_or_else(wrong)?;
            let mut out = BytesMut::with_capacity(text.len() * 2);
            encode_utf16_string(text, &mut out);
            Ok(out.to_vec())
        }
        TypeId::BigVarBinary | TypeId::BigBinary | TypeId::Image | TypeId::Udt => {
            Ok(value.as_bytes().ok_or_else(wrong)?.to_vec())
        }
        TypeId::Variant => encode_variant(type_info, value),
    }
}

fn encode_int(type_info: &TypeInfo, v: i64, width: usize) -> Result<Vec<u8>, TypeError> {
    let out = match width {
        1 => vec![u8::try_from(v).map_err(|_| out_of_range(type_info))?],
        2 => i16::try_from(v)
            .map_err(|_| out_of_range(type_info))?
            .to_le_bytes()
            .to_vec(),
        4 => i32::try_from(v)
            .map_err(|_| out_of_range(type_info))?
            .to_le_bytes()
            .to_vec(),
        8 => v.to_le_bytes().to_vec(),
        _ => return Err(TypeError::InvalidLength { type_name: "int", length: width }),
    };
    Ok(out)
}

fn encode_float(type_info: &TypeInfo, value: &SqlValue, width: usize) -> Result<Vec<u8>, TypeError> {
    match (value, width) {
        (SqlValue::Float(v), 4) => Ok(v.to_le_bytes().to_vec()),
        (SqlValue::Float(v), 8) => Ok(f64::from(*v).to_le_bytes().to_vec()),
        (SqlValue::Double(v), 8) => Ok(v.to_le_bytes().to_vec()),
        (SqlValue::Double(v), 4) => {
            let narrowed = *v as f32;
            if f64::from(narrowed) != *v {
                return Err(TypeError::Truncation(format!("{v} does not fit in real")));
            }
            Ok(narrowed.to_le_bytes().to_vec())
        }
        _ => Err(mismatch(type_info, value)),
    }
}

/// Integer mantissa of `value` at `scale`, with range errors naming the
/// target column type.
fn mantissa_at_scale(type_info: &TypeInfo, value: Numeric, scale: u8) -> Result<i128, TypeError> {
    value.mantissa_at_scale(scale).map_err(|err| match err {
        TypeError::OutOfRange { .. } => out_of_range(type_info),
        other => other,
    })
}

fn encode_decimal(type_info: &TypeInfo, value: Numeric) -> Result<Vec<u8>, TypeError> {
    let precision = type_info.precision.clamp(1, MAX_PRECISION);
    let mantissa = mantissa_at_scale(type_info, value, type_info.scale)?;
    if mantissa.unsigned_abs() >= 10u128.pow(u32::from(precision)) {
        return Err(out_of_range(type_info));
    }

    let width = decimal_width(precision);
    let mut out = Vec::with_capacity(width + 1);
    out.push(u8::from(mantissa >= 0));
    out.extend_from_slice(&mantissa.unsigned_abs().to_le_bytes()[..width]);
    Ok(out)
}

fn encode_money(type_info: &TypeInfo, value: Numeric, width: usize) -> Result<Vec<u8>, TypeError> {
    let units = mantissa_at_scale(type_info, value, 4)?;
    match width {
        8 => {
            let units = i64::try_from(units).map_err(|_| out_of_range(type_info))?;
            let mut out = Vec::with_capacity(8);
            out.extend_from_slice(&((units >> 32) as i32).to_le_bytes());
            out.extend_from_slice(&(units as u32).to_le_bytes());
            Ok(out)
        }
        4 => Ok(i32::try_from(units)
            .map_err(|_| out_of_range(type_info))?
            .to_le_bytes()
            .to_vec()),
        _ => Err(TypeError::InvalidLength { type_name: "money", length: width }),
    }
}

fn days_since_epoch(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) - 1
}

fn nanos_of_day(time: NaiveTime) -> Result<u64, TypeError> {
    if time.nanosecond() >= NANOS_PER_SECOND as u32 {
        return Err(TypeError::OutOfRange { target_type: "time" });
    }
    Ok(u64::from(time.num_seconds_from_midnight()) * NANOS_PER_SECOND + u64::from(time.nanosecond()))
}

fn write_date(out: &mut Vec<u8>, date: NaiveDate) -> Result<(), TypeError> {
    let days = days_since_epoch(date);
    if !(0..=MAX_DAYS).contains(&days) {
        return Err(TypeError::OutOfRange { target_type: "date" });
    }
    out.extend_from_slice(&(days as u32).to_le_bytes()[..3]);
    Ok(())
}

fn write_time(out: &mut Vec<u8>, time: NaiveTime, scale: u8) -> Result<(), TypeError> {
    let nanos = nanos_of_day(time)?;
    let per_tick = nanos_per_tick(scale);
    if nanos % per_tick != 0 {
        return Err(TypeError::Truncation(format!(
            "{time} has more than {scale} fractional digits"
        )));
    }
    out.extend_from_slice(&(nanos / per_tick).to_le_bytes()[..time_width(scale)]);
    Ok(())
}

/// 1753-01-01, the first day DATETIME can hold, relative to 1900-01-01.
const MIN_DATETIME_DAYS: i64 = -53_690;

fn encode_legacy_datetime(
    type_info: &TypeInfo,
    value: NaiveDateTime,
    width: usize,
) -> Result<Vec<u8>, TypeError> {
    let days = days_since_epoch(value.date()) - DAYS_TO_1900;
    let nanos = nanos_of_day(value.time())?;
    match width {
        8 => {
            if days < MIN_DATETIME_DAYS {
                return Err(out_of_range(type_info));
            }
            let days = i32::try_from(days).map_err(|_| out_of_range(type_info))?;
            let ticks = (nanos * DATETIME_TICKS_PER_SECOND + NANOS_PER_SECOND / 2) / NANOS_PER_SECOND;
            if ticks >= DATETIME_TICKS_PER_SECOND * SECONDS_PER_DAY
                || ticks * NANOS_PER_SECOND / DATETIME_TICKS_PER_SECOND != nanos
            {
                return Err(TypeError::Truncation(format!(
                    "{value} is not a multiple of 1/300 second"
                )));
            }
            let mut out = Vec::with_capacity(8);
            out.extend_from_slice(&days.to_le_bytes());
            out.extend_from_slice(&(ticks as u32).to_le_bytes());
            Ok(out)
        }
        4 => {
            let days = u16::try_from(days).map_err(|_| out_of_range(type_info))?;
            if nanos % (60 * NANOS_PER_SECOND) != 0 {
                return Err(TypeError::Truncation(format!(
                    "{value} is not a whole minute"
                )));
            }
            let minutes = (nanos / (60 * NANOS_PER_SECOND)) as u16;
            let mut out = Vec::with_capacity(4);
            out.extend_from_slice(&days.to_le_bytes());
            out.extend_from_slice(&minutes.to_le_bytes());
            Ok(out)
        }
        _ => Err(TypeError::InvalidLength { type_name: "datetime", length: width }),
    }
}

fn encode_varchar(text: &str, collation: Collation) -> Result<Vec<u8>, TypeError> {
    if collation.is_utf8() {
        return Ok(text.as_bytes().to_vec());
    }
    let encoding = collation.encoding();
    let (bytes, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(TypeError::InvalidEncoding(format!(
            "text not representable in {}",
            encoding.name()
        )));
    }
    Ok(bytes.into_owned())
}

/// Base type used to carry `value` inside a `sql_variant`.
fn variant_base(value: &SqlValue) -> Option<TypeInfo> {
    let info = match value {
        SqlValue::Bool(_) => TypeInfo::new(TypeId::Bit),
        SqlValue::TinyInt(_) => TypeInfo::new(TypeId::Int1),
        SqlValue::SmallInt(_) => TypeInfo::new(TypeId::Int2),
        SqlValue::Int(_) => TypeInfo::new(TypeId::Int4),
        SqlValue::BigInt(_) => TypeInfo::new(TypeId::Int8),
        SqlValue::Float(_) => TypeInfo::new(TypeId::Float4),
        SqlValue::Double(_) => TypeInfo::new(TypeId::Float8),
        SqlValue::String(_) => TypeInfo::nvarchar((MAX_USHORT_LENGTH / 2) as u16),
        SqlValue::Binary(_) => TypeInfo::varbinary(MAX_USHORT_LENGTH as u16),
        other => {
            let info = TypeInfo::for_value(other);
            if matches!(info.type_id, TypeId::Xml) || other.is_null() {
                return None;
            }
            info
        }
    };
    Some(info)
}

fn encode_variant(type_info: &TypeInfo, value: &SqlValue) -> Result<Vec<u8>, TypeError> {
    let base = variant_base(value).ok_or_else(|| mismatch(type_info, value))?;

    let mut props = BytesMut::new();
    match base.type_id {
        TypeId::DecimalN | TypeId::NumericN => {
            props.put_u8(base.precision);
            props.put_u8(base.scale);
        }
        TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => props.put_u8(base.scale),
        TypeId::BigVarBinary => props.put_u16_le(base.max_length as u16),
        TypeId::NVarChar => {
            base.collation_or_default().encode(&mut props);
            props.put_u16_le(base.max_length as u16);
        }
        _ => {}
    }

    let payload = encode_payload(&base, value)?;
    if matches!(base.type_id, TypeId::NVarChar | TypeId::BigVarBinary)
        && payload.len() > base.max_length as usize
    {
        return Err(too_long(type_info, payload.len()));
    }

    let mut out = Vec::with_capacity(2 + props.len() + payload.len());
    out.push(base.type_id as u8);
    out.push(props.len() as u8);
    out.extend_from_slice(&props);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Encode a string as UTF-16LE.
pub fn encode_utf16_string(s: &str, buf: &mut BytesMut) {
    for code_unit in s.encode_utf16() {
        buf.put_u16_le(code_unit);
    }
}
