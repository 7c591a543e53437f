//! Type descriptors (TYPE_INFO).
//!
//! A [`TypeInfo`] is everything the codec needs to read or write one value:
//! the type id plus its declared length, precision, scale and collation.
//! Descriptors are read from COLMETADATA and RETURNVALUE tokens and written
//! in front of every RPC parameter.

use bytes::{BufMut, BytesMut};

use crate::collation::Collation;
use crate::cursor::WireCursor;
use crate::error::TypeError;
use crate::type_id::{LengthKind, TypeId};
use crate::value::SqlValue;

/// Declared length marking a `(max)` column sent as PLP.
pub const MAX_LENGTH_PLP: u32 = 0xFFFF;

/// Largest non-`(max)` length for two-byte length types, in bytes.
pub const MAX_USHORT_LENGTH: u32 = 8000;

/// Largest decimal precision SQL Server accepts.
pub const MAX_PRECISION: u8 = 38;

/// Largest fractional-second scale for time types.
pub const MAX_TIME_SCALE: u8 = 7;

/// Type descriptor for one column or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// The TDS type id.
    pub type_id: TypeId,
    /// Declared length in bytes. `0xFFFF` on two-byte length types means `(max)`.
    pub max_length: u32,
    /// Precision for decimal types.
    pub precision: u8,
    /// Scale for decimal and time types.
    pub scale: u8,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

/// Magnitude width in bytes of a decimal with the given precision.
#[must_use]
pub const fn decimal_width(precision: u8) -> usize {
    match precision {
        0..=9 => 4,
        10..=19 => 8,
        20..=28 => 12,
        _ => 16,
    }
}

/// Byte width of a time value with the given scale.
#[must_use]
pub const fn time_width(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

impl TypeInfo {
    /// Create a descriptor with the type's default length and no collation.
    #[must_use]
    pub fn new(type_id: TypeId) -> Self {
        let max_length = match type_id {
            TypeId::Date => 3,
            TypeId::Guid => 16,
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                Self::temporal_length(type_id, MAX_TIME_SCALE)
            }
            other => other.fixed_size().unwrap_or(0) as u32,
        };
        Self {
            type_id,
            max_length,
            precision: 0,
            scale: 0,
            collation: None,
        }
    }

    fn with_length(type_id: TypeId, max_length: u32) -> Self {
        Self {
            max_length,
            ..Self::new(type_id)
        }
    }

    fn temporal_length(type_id: TypeId, scale: u8) -> u32 {
        let time = time_width(scale) as u32;
        match type_id {
            TypeId::Time => time,
            TypeId::DateTime2 => time + 3,
            _ => time + 5,
        }
    }

    /// Nullable integer of `width` bytes (1, 2, 4 or 8).
    #[must_use]
    pub fn int(width: u8) -> Self {
        Self::with_length(TypeId::IntN, u32::from(width))
    }

    /// Nullable bit.
    #[must_use]
    pub fn bit() -> Self {
        Self::with_length(TypeId::BitN, 1)
    }

    /// Nullable float of `width` bytes (4 or 8).
    #[must_use]
    pub fn float(width: u8) -> Self {
        Self::with_length(TypeId::FloatN, u32::from(width))
    }

    /// Nullable 8-byte money.
    #[must_use]
    pub fn money() -> Self {
        Self::with_length(TypeId::MoneyN, 8)
    }

    /// Nullable 4-byte smallmoney.
    #[must_use]
    pub fn small_money() -> Self {
        Self::with_length(TypeId::MoneyN, 4)
    }

    /// Decimal with the given precision and scale.
    #[must_use]
    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self {
            precision,
            scale,
            ..Self::with_length(TypeId::DecimalN, decimal_width(precision) as u32 + 1)
        }
    }

    /// Numeric with the given precision and scale.
    #[must_use]
    pub fn numeric(precision: u8, scale: u8) -> Self {
        Self {
            type_id: TypeId::NumericN,
            ..Self::decimal(precision, scale)
        }
    }

    /// Unique identifier.
    #[must_use]
    pub fn guid() -> Self {
        Self::new(TypeId::Guid)
    }

    /// Date.
    #[must_use]
    pub fn date() -> Self {
        Self::new(TypeId::Date)
    }

    fn scaled(type_id: TypeId, scale: u8) -> Self {
        Self {
            scale,
            ..Self::with_length(type_id, Self::temporal_length(type_id, scale))
        }
    }

    /// Time with `scale` fractional second digits.
    #[must_use]
    pub fn time(scale: u8) -> Self {
        Self::scaled(TypeId::Time, scale)
    }

    /// DateTime2 with `scale` fractional second digits.
    #[must_use]
    pub fn datetime2(scale: u8) -> Self {
        Self::scaled(TypeId::DateTime2, scale)
    }

    /// DateTimeOffset with `scale` fractional second digits.
    #[must_use]
    pub fn datetimeoffset(scale: u8) -> Self {
        Self::scaled(TypeId::DateTimeOffset, scale)
    }

    /// Nullable 8-byte datetime.
    #[must_use]
    pub fn datetime() -> Self {
        Self::with_length(TypeId::DateTimeN, 8)
    }

    /// Nullable 4-byte smalldatetime.
    #[must_use]
    pub fn small_datetime() -> Self {
        Self::with_length(TypeId::DateTimeN, 4)
    }

    /// `nvarchar(chars)`.
    #[must_use]
    pub fn nvarchar(chars: u16) -> Self {
        Self {
            collation: Some(Collation::LATIN1_GENERAL),
            ..Self::with_length(TypeId::NVarChar, u32::from(chars) * 2)
        }
    }

    /// `nvarchar(max)`.
    #[must_use]
    pub fn nvarchar_max() -> Self {
        Self {
            collation: Some(Collation::LATIN1_GENERAL),
            ..Self::with_length(TypeId::NVarChar, MAX_LENGTH_PLP)
        }
    }

    /// `nchar(chars)`.
    #[must_use]
    pub fn nchar(chars: u16) -> Self {
        Self {
            type_id: TypeId::NChar,
            ..Self::nvarchar(chars)
        }
    }

    /// `varchar(len)` under `collation`.
    #[must_use]
    pub fn varchar(len: u16, collation: Collation) -> Self {
        Self {
            collation: Some(collation),
            ..Self::with_length(TypeId::BigVarChar, u32::from(len))
        }
    }

    /// `varchar(max)` under `collation`.
    #[must_use]
    pub fn varchar_max(collation: Collation) -> Self {
        Self {
            collation: Some(collation),
            ..Self::with_length(TypeId::BigVarChar, MAX_LENGTH_PLP)
        }
    }

    /// `varbinary(len)`.
    #[must_use]
    pub fn varbinary(len: u16) -> Self {
        Self::with_length(TypeId::BigVarBinary, u32::from(len))
    }

    /// `varbinary(max)`.
    #[must_use]
    pub fn varbinary_max() -> Self {
        Self::with_length(TypeId::BigVarBinary, MAX_LENGTH_PLP)
    }

    /// `binary(len)`.
    #[must_use]
    pub fn binary(len: u16) -> Self {
        Self::with_length(TypeId::BigBinary, u32::from(len))
    }

    /// XML without a schema collection.
    #[must_use]
    pub fn xml() -> Self {
        Self::with_length(TypeId::Xml, MAX_LENGTH_PLP)
    }

    /// `sql_variant`.
    #[must_use]
    pub fn variant() -> Self {
        Self::with_length(TypeId::Variant, 8016)
    }

    /// Pick a descriptor able to carry `value` as an RPC parameter.
    #[must_use]
    pub fn for_value(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::nvarchar(1),
            SqlValue::Bool(_) => Self::bit(),
            SqlValue::TinyInt(_) => Self::int(1),
            SqlValue::SmallInt(_) => Self::int(2),
            SqlValue::Int(_) => Self::int(4),
            SqlValue::BigInt(_) => Self::int(8),
            SqlValue::Float(_) => Self::float(4),
            SqlValue::Double(_) => Self::float(8),
            SqlValue::String(s) => {
                let units = s.encode_utf16().count();
                if units * 2 > MAX_USHORT_LENGTH as usize {
                    Self::nvarchar_max()
                } else {
                    Self::nvarchar(4000)
                }
            }
            SqlValue::Binary(b) => {
                if b.len() > MAX_USHORT_LENGTH as usize {
                    Self::varbinary_max()
                } else {
                    Self::varbinary(MAX_USHORT_LENGTH as u16)
                }
            }
            SqlValue::Decimal(d) => Self::decimal(MAX_PRECISION, d.scale() as u8),
            SqlValue::Numeric(n) => Self::decimal(MAX_PRECISION, n.scale()),
            SqlValue::Uuid(_) => Self::guid(),
            SqlValue::Date(_) => Self::date(),
            SqlValue::Time(_) => Self::time(MAX_TIME_SCALE),
            SqlValue::DateTime(_) => Self::datetime2(MAX_TIME_SCALE),
            SqlValue::DateTimeOffset(_) => Self::datetimeoffset(MAX_TIME_SCALE),
            SqlValue::Xml(_) => Self::xml(),
        }
    }

    /// How value lengths are framed for this descriptor.
    #[must_use]
    pub fn length_kind(&self) -> LengthKind {
        if let Some(size) = self.type_id.fixed_size() {
            return LengthKind::Fixed(size);
        }
        match self.type_id {
            TypeId::BigVarBinary
            | TypeId::BigVarChar
            | TypeId::BigBinary
            | TypeId::BigChar
            | TypeId::NVarChar
            | TypeId::NChar
            | TypeId::Udt => {
                if self.max_length == MAX_LENGTH_PLP {
                    LengthKind::Plp
                } else {
                    LengthKind::UShort
                }
            }
            TypeId::Xml => LengthKind::Plp,
            TypeId::Text | TypeId::NText | TypeId::Image => LengthKind::TextPtr,
            TypeId::Variant => LengthKind::Long,
            _ => LengthKind::Byte,
        }
    }

    /// Whether values use PLP chunked framing.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.length_kind() == LengthKind::Plp
    }

    /// Collation of character data, defaulting to Latin1_General.
    #[must_use]
    pub fn collation_or_default(&self) -> Collation {
        self.collation.unwrap_or(Collation::LATIN1_GENERAL)
    }

    /// SQL declaration of this type, as used in `sp_executesql` parameter lists.
    #[must_use]
    pub fn declaration(&self) -> String {
        let name = self.type_id.name();
        match self.type_id {
            TypeId::IntN => match self.max_length {
                1 => "tinyint".to_owned(),
                2 => "smallint".to_owned(),
                8 => "bigint".to_owned(),
                _ => "int".to_owned(),
            },
            TypeId::FloatN if self.max_length == 4 => "real".to_owned(),
            TypeId::MoneyN if self.max_length == 4 => "smallmoney".to_owned(),
            TypeId::DateTimeN if self.max_length == 4 => "smalldatetime".to_owned(),
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                format!("{name}({},{})", self.precision, self.scale)
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                format!("{name}({})", self.scale)
            }
            TypeId::NVarChar | TypeId::NChar if self.max_length == MAX_LENGTH_PLP => {
                format!("{name}(max)")
            }
            TypeId::NVarChar | TypeId::NChar => format!("{name}({})", self.max_length / 2),
            TypeId::BigVarChar | TypeId::BigChar | TypeId::BigVarBinary | TypeId::BigBinary
                if self.max_length == MAX_LENGTH_PLP =>
            {
                format!("{name}(max)")
            }
            TypeId::BigVarChar | TypeId::BigChar | TypeId::BigVarBinary | TypeId::BigBinary => {
                format!("{name}({})", self.max_length)
            }
            _ => name.to_owned(),
        }
    }

    /// Read a TYPE_INFO structure.
    ///
    /// For the legacy `text`/`ntext`/`image` types the table name that
    /// follows the descriptor in COLMETADATA is consumed as well.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, TypeError> {
        let byte = cursor.read_u8()?;
        let type_id = TypeId::from_u8(byte).ok_or(TypeError::UnsupportedType(byte))?;
        let mut info = Self::new(type_id);

        match type_id {
            TypeId::Guid
            | TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN => {
                info.max_length = u32::from(cursor.read_u8()?);
            }
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                info.max_length = u32::from(cursor.read_u8()?);
                info.precision = cursor.read_u8()?;
                info.scale = cursor.read_u8()?;
                if info.precision == 0 || info.precision > MAX_PRECISION {
                    return Err(TypeError::InvalidLength {
                        type_name: "decimal precision",
                        length: info.precision as usize,
                    });
                }
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                let scale = cursor.read_u8()?;
                if scale > MAX_TIME_SCALE {
                    return Err(TypeError::InvalidLength {
                        type_name: "time scale",
                        length: scale as usize,
                    });
                }
                info = Self::scaled(type_id, scale);
            }
            TypeId::BigVarBinary | TypeId::BigBinary => {
                info.max_length = u32::from(cursor.read_u16_le()?);
            }
            TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
                info.max_length = u32::from(cursor.read_u16_le()?);
                info.collation = Some(Collation::decode(cursor)?);
            }
            TypeId::Text | TypeId::NText => {
                info.max_length = cursor.read_u32_le()?;
                info.collation = Some(Collation::decode(cursor)?);
                skip_table_name(cursor)?;
            }
            TypeId::Image => {
                info.max_length = cursor.read_u32_le()?;
                skip_table_name(cursor)?;
            }
            TypeId::Variant => {
                info.max_length = cursor.read_u32_le()?;
            }
            TypeId::Xml => {
                if cursor.read_u8()? != 0 {
                    cursor.read_b_varchar()?; // database
                    cursor.read_b_varchar()?; // owning schema
                    cursor.read_us_varchar()?; // schema collection
                }
            }
            TypeId::Udt => {
                info.max_length = u32::from(cursor.read_u16_le()?);
                cursor.read_b_varchar()?; // database
                cursor.read_b_varchar()?; // schema
                cursor.read_b_varchar()?; // type name
                cursor.read_us_varchar()?; // assembly qualified name
            }
            _ => {}
        }

        Ok(info)
    }

    /// Write this descriptor as an RPC parameter TYPE_INFO.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.type_id as u8);
        match self.type_id {
            TypeId::Guid
            | TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN => dst.put_u8(self.max_length as u8),
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                dst.put_u8(self.max_length as u8);
                dst.put_u8(self.precision);
                dst.put_u8(self.scale);
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => dst.put_u8(self.scale),
            TypeId::BigVarBinary | TypeId::BigBinary => dst.put_u16_le(self.max_length as u16),
            TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
                dst.put_u16_le(self.max_length as u16);
                self.collation_or_default().encode(dst);
            }
            TypeId::Text | TypeId::NText => {
                dst.put_u32_le(self.max_length);
                self.collation_or_default().encode(dst);
            }
            TypeId::Image | TypeId::Variant => dst.put_u32_le(self.max_length),
            TypeId::Xml => dst.put_u8(0),
            TypeId::Udt => {
                dst.put_u16_le(self.max_length as u16);
                dst.put_u8(0);
                dst.put_u8(0);
                dst.put_u8(0);
                dst.put_u16_le(0);
            }
            _ => {}
        }
    }
}

fn skip_table_name(cursor: &mut WireCursor) -> Result<(), TypeError> {
    let parts = cursor.read_u8()?;
    for _ in 0..parts {
        cursor.read_us_varchar()?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reparse(info: &TypeInfo) -> TypeInfo {
        let mut buf = BytesMut::new();
        info.encode(&mut buf);
        let mut cursor = WireCursor::new(buf.freeze());
        let parsed = TypeInfo::decode(&mut cursor).unwrap();
        assert!(cursor.is_empty());
        parsed
    }

    #[test]
    fn test_decimal_width_banding() {
        assert_eq!(decimal_width(1), 4);
        assert_eq!(decimal_width(9), 4);
        assert_eq!(decimal_width(10), 8);
        assert_eq!(decimal_width(19), 8);
        assert_eq!(decimal_width(20), 12);
        assert_eq!(decimal_width(28), 12);
        assert_eq!(decimal_width(29), 16);
        assert_eq!(decimal_width(38), 16);
        assert_eq!(TypeInfo::decimal(18, 2).max_length, 9);
    }

    #[test]
    fn test_time_width() {
        assert_eq!(TypeInfo::time(0).max_length, 3);
        assert_eq!(TypeInfo::time(4).max_length, 4);
        assert_eq!(TypeInfo::datetime2(7).max_length, 8);
        assert_eq!(TypeInfo::datetimeoffset(3).max_length, 9);
    }

    #[test]
    fn test_nvarchar_type_info_bytes() {
        let mut buf = BytesMut::new();
        TypeInfo::nvarchar(50).encode(&mut buf);
        assert_eq!(
            &buf[..],
            &[0xE7, 100, 0, 0x09, 0x04, 0xD0, 0x00, 0x34]
        );
    }

    #[test]
    fn test_descriptor_reparse() {
        for info in [
            TypeInfo::int(4),
            TypeInfo::bit(),
            TypeInfo::decimal(38, 10),
            TypeInfo::numeric(5, 0),
            TypeInfo::datetime2(3),
            TypeInfo::date(),
            TypeInfo::guid(),
            TypeInfo::nvarchar_max(),
            TypeInfo::varbinary(16),
            TypeInfo::varchar(10, Collation::new(0x0419, 0)),
            TypeInfo::money(),
        ] {
            assert_eq!(reparse(&info), info);
        }
    }

    #[test]
    fn test_text_descriptor_skips_table_name() {
        let mut cursor = WireCursor::from(
            &[
                0x23, // TEXT
                0xFF, 0xFF, 0xFF, 0x7F, // max length
                0x09, 0x04, 0xD0, 0x00, 0x34, // collation
                0x01, // one part
                0x01, 0x00, b't', 0x00, // "t"
                0xAA,
            ][..],
        );
        let info = TypeInfo::decode(&mut cursor).unwrap();
        assert_eq!(info.type_id, TypeId::Text);
        assert_eq!(info.length_kind(), LengthKind::TextPtr);
        assert_eq!(cursor.peek_u8(), Some(0xAA));
    }

    #[test]
    fn test_invalid_precision_rejected() {
        let mut cursor = WireCursor::from(&[0x6A, 17, 39, 0][..]);
        assert!(matches!(
            TypeInfo::decode(&mut cursor),
            Err(TypeError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut cursor = WireCursor::from(&[0x99][..]);
        assert!(matches!(
            TypeInfo::decode(&mut cursor),
            Err(TypeError::UnsupportedType(0x99))
        ));
    }

    #[test]
    fn test_declarations() {
        assert_eq!(TypeInfo::int(8).declaration(), "bigint");
        assert_eq!(TypeInfo::nvarchar(4000).declaration(), "nvarchar(4000)");
        assert_eq!(TypeInfo::nvarchar_max().declaration(), "nvarchar(max)");
        assert_eq!(TypeInfo::decimal(18, 2).declaration(), "decimal(18,2)");
        assert_eq!(TypeInfo::datetime2(7).declaration(), "datetime2(7)");
        assert_eq!(TypeInfo::float(4).declaration(), "real");
    }

    #[test]
    fn test_for_value() {
        assert_eq!(TypeInfo::for_value(&SqlValue::Int(1)), TypeInfo::int(4));
        assert_eq!(
            TypeInfo::for_value(&SqlValue::String("x".repeat(5000))),
            TypeInfo::nvarchar_max()
        );
    }
}
