//! Decoded SQL Server scalar values.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::numeric::Numeric;

/// One scalar value as produced by the type codec.
///
/// Money types decode to [`SqlValue::Decimal`] with scale 4, and every
/// legacy date/time type decodes to [`SqlValue::DateTime`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// SQL NULL.
    #[default]
    Null,
    /// BIT.
    Bool(bool),
    /// TINYINT.
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Float(f32),
    /// FLOAT.
    Double(f64),
    /// Character data of any width or collation.
    String(String),
    /// BINARY, VARBINARY, IMAGE and UDT payloads.
    Binary(Bytes),
    /// DECIMAL, NUMERIC, MONEY, SMALLMONEY.
    Decimal(Decimal),
    /// DECIMAL or NUMERIC too wide or too finely scaled for [`Decimal`].
    Numeric(Numeric),
    /// UNIQUEIDENTIFIER.
    Uuid(Uuid),
    /// DATE.
    Date(NaiveDate),
    /// TIME.
    Time(NaiveTime),
    /// DATETIME, SMALLDATETIME, DATETIME2.
    DateTime(NaiveDateTime),
    /// DATETIMEOFFSET.
    DateTimeOffset(DateTime<FixedOffset>),
    /// XML.
    Xml(String),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as a bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The value widened to an i32, for the integer types that fit.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::SmallInt(v) => Some(i32::from(*v)),
            Self::TinyInt(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    /// The value widened to an i64, for any integer type.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            other => other.as_i32().map(i64::from),
        }
    }

    /// The value as an f64, for either float width.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// The value as a decimal, if it fits one.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(v) => Some(*v),
            Self::Numeric(v) => v.to_decimal(),
            _ => None,
        }
    }

    /// The value as an exact numeric, for either decimal representation.
    #[must_use]
    pub fn as_numeric(&self) -> Option<Numeric> {
        match self {
            Self::Decimal(v) => Some(Numeric::from(*v)),
            Self::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// The text of a character or XML value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Xml(v) => Some(v),
            _ => None,
        }
    }

    /// The bytes of a binary value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a date.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a date and time without offset.
    #[must_use]
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// SQL type name of the value, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "bit",
            Self::TinyInt(_) => "tinyint",
            Self::SmallInt(_) => "smallint",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Float(_) => "real",
            Self::Double(_) => "float",
            Self::String(_) => "nvarchar",
            Self::Binary(_) => "varbinary",
            Self::Decimal(_) | Self::Numeric(_) => "decimal",
            Self::Uuid(_) => "uniqueidentifier",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime2",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::Xml(_) => "xml",
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    u8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    String => String,
    &str => String,
    Bytes => Binary,
    Vec<u8> => Binary,
    Decimal => Decimal,
    Numeric => Numeric,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widening() {
        assert_eq!(SqlValue::TinyInt(200).as_i32(), Some(200));
        assert_eq!(SqlValue::SmallInt(-5).as_i64(), Some(-5));
        assert_eq!(SqlValue::BigInt(i64::MAX).as_i32(), None);
    }

    #[test]
    fn test_from_option() {
        assert!(SqlValue::from(None::<i32>).is_null());
        assert_eq!(SqlValue::from(Some("a")), SqlValue::String("a".into()));
        assert_eq!(SqlValue::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_numeric_views() {
        let small = SqlValue::Numeric(Numeric::new(250, 2).unwrap());
        assert_eq!(small.as_decimal(), Some(Decimal::new(250, 2)));

        let wide = SqlValue::Numeric("12345678901234567890123456789012345.5".parse().unwrap());
        assert_eq!(wide.as_decimal(), None);
        assert_eq!(wide.as_numeric().unwrap().scale(), 1);
        assert_eq!(wide.type_name(), "decimal");
    }
}
