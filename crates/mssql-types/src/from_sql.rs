//! Trait for converting from SQL values to Rust types.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::SqlValue;

/// Trait for types that can be converted from SQL values.
///
/// Used by row accessors to extract typed column values.
pub trait FromSql: Sized {
    /// Convert from a SQL value to this type.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert from an optional SQL value.
    ///
    /// Returns `None` if the value is NULL.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn convert<T>(
    value: &SqlValue,
    expected: &'static str,
    extract: impl FnOnce(&SqlValue) -> Option<T>,
) -> Result<T, TypeError> {
    if value.is_null() {
        return Err(TypeError::UnexpectedNull);
    }
    extract(value).ok_or_else(|| TypeError::TypeMismatch {
        expected,
        actual: value.type_name().to_owned(),
    })
}

macro_rules! impl_from_sql {
    ($($ty:ty => $name:literal, $extract:expr;)*) => {
        $(
            impl FromSql for $ty {
                fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                    convert(value, $name, $extract)
                }
            }
        )*
    };
}

impl_from_sql! {
    bool => "bool", SqlValue::as_bool;
    i32 => "i32", SqlValue::as_i32;
    i64 => "i64", SqlValue::as_i64;
    f64 => "f64", SqlValue::as_f64;
    Numeric => "Numeric", SqlValue::as_numeric;
    Uuid => "Uuid", SqlValue::as_uuid;
    NaiveDate => "NaiveDate", SqlValue::as_date;
    NaiveDateTime => "NaiveDateTime", SqlValue::as_datetime;
    String => "String", |v: &SqlValue| v.as_str().map(str::to_owned);
    Vec<u8> => "Vec<u8>", |v: &SqlValue| v.as_bytes().map(<[u8]>::to_vec);
    u8 => "u8", |v: &SqlValue| match v {
        SqlValue::TinyInt(v) => Some(*v),
        _ => None,
    };
    i16 => "i16", |v: &SqlValue| match v {
        SqlValue::SmallInt(v) => Some(*v),
        SqlValue::TinyInt(v) => Some(i16::from(*v)),
        _ => None,
    };
    f32 => "f32", |v: &SqlValue| match v {
        SqlValue::Float(v) => Some(*v),
        _ => None,
    };
    Bytes => "Bytes", |v: &SqlValue| match v {
        SqlValue::Binary(v) => Some(v.clone()),
        _ => None,
    };
    NaiveTime => "NaiveTime", |v: &SqlValue| match v {
        SqlValue::Time(v) => Some(*v),
        _ => None,
    };
    DateTime<FixedOffset> => "DateTime<FixedOffset>", |v: &SqlValue| match v {
        SqlValue::DateTimeOffset(v) => Some(*v),
        _ => None,
    };
}

impl FromSql for Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Numeric(n) => n
                .to_decimal()
                .ok_or(TypeError::OutOfRange { target_type: "Decimal" }),
            other => convert(other, "Decimal", SqlValue::as_decimal),
        }
    }
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}
