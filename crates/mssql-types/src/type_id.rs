//! TDS data type identifiers.
//!
//! These are the type bytes sent in column metadata and parameter definitions.

/// TDS data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // Fixed-length types (no length prefix)
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer (TINYINT).
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 8-byte money.
    Money = 0x3C,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 4-byte money.
    Money4 = 0x7A,

    // One-byte length prefix
    /// Unique identifier.
    Guid = 0x24,
    /// Nullable integer.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float.
    FloatN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,
    /// Date (3 bytes).
    Date = 0x28,
    /// Time with variable scale.
    Time = 0x29,
    /// DateTime2 with variable scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with variable scale.
    DateTimeOffset = 0x2B,

    // Two-byte length prefix
    /// Variable-length binary.
    BigVarBinary = 0xA5,
    /// Variable-length character.
    BigVarChar = 0xA7,
    /// Fixed-length binary.
    BigBinary = 0xAD,
    /// Fixed-length character.
    BigChar = 0xAF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,
    /// Fixed-length Unicode character.
    NChar = 0xEF,

    // Legacy large objects (text pointer + four-byte length)
    /// Image.
    Image = 0x22,
    /// Text.
    Text = 0x23,
    /// NText.
    NText = 0x63,

    // Special types
    /// SQL variant.
    Variant = 0x62,
    /// User-defined type.
    Udt = 0xF0,
    /// XML.
    Xml = 0xF1,
}

/// How the byte length of a value is determined on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
    /// Length implied by the type id.
    Fixed(usize),
    /// One-byte length; zero means NULL.
    Byte,
    /// Two-byte length; `0xFFFF` means NULL.
    UShort,
    /// Partially length-prefixed chunks.
    Plp,
    /// Text pointer, timestamp and four-byte length.
    TextPtr,
    /// Four-byte length; zero means NULL.
    Long,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        let id = match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3A => Self::DateTime4,
            0x3B => Self::Float4,
            0x3C => Self::Money,
            0x3D => Self::DateTime,
            0x3E => Self::Float8,
            0x7A => Self::Money4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0xA5 => Self::BigVarBinary,
            0xA7 => Self::BigVarChar,
            0xAD => Self::BigBinary,
            0xAF => Self::BigChar,
            0xE7 => Self::NVarChar,
            0xEF => Self::NChar,
            0x22 => Self::Image,
            0x23 => Self::Text,
            0x63 => Self::NText,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            _ => return None,
        };
        Some(id)
    }

    /// Fixed size of this type in bytes, if it has no length prefix.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Check if this is a fixed-length type.
    #[must_use]
    pub const fn is_fixed_length(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Check if this type carries a collation in its TYPE_INFO.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NVarChar | Self::NChar | Self::Text | Self::NText
        )
    }

    /// Check if this is a Unicode character type.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Check if this is a date/time type.
    #[must_use]
    pub const fn is_datetime(&self) -> bool {
        matches!(
            self,
            Self::DateTime
                | Self::DateTime4
                | Self::DateTimeN
                | Self::Date
                | Self::Time
                | Self::DateTime2
                | Self::DateTimeOffset
        )
    }

    /// Check if this type has a precision/scale pair.
    #[must_use]
    pub const fn is_decimal(&self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Numeric | Self::DecimalN | Self::NumericN
        )
    }

    /// Check if this type has only a scale (fractional second digits).
    #[must_use]
    pub const fn has_scale_only(&self) -> bool {
        matches!(self, Self::Time | Self::DateTime2 | Self::DateTimeOffset)
    }

    /// SQL type name used in declarations and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Int1 => "tinyint",
            Self::Bit | Self::BitN => "bit",
            Self::Int2 => "smallint",
            Self::Int4 => "int",
            Self::Int8 => "bigint",
            Self::IntN => "int",
            Self::DateTime4 => "smalldatetime",
            Self::Float4 => "real",
            Self::Float8 | Self::FloatN => "float",
            Self::Money | Self::MoneyN => "money",
            Self::Money4 => "smallmoney",
            Self::DateTime | Self::DateTimeN => "datetime",
            Self::Guid => "uniqueidentifier",
            Self::Decimal | Self::DecimalN => "decimal",
            Self::Numeric | Self::NumericN => "numeric",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
            Self::BigVarBinary => "varbinary",
            Self::BigVarChar => "varchar",
            Self::BigBinary => "binary",
            Self::BigChar => "char",
            Self::NVarChar => "nvarchar",
            Self::NChar => "nchar",
            Self::Image => "image",
            Self::Text => "text",
            Self::NText => "ntext",
            Self::Variant => "sql_variant",
            Self::Udt => "udt",
            Self::Xml => "xml",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_from_u8() {
        assert_eq!(TypeId::from_u8(0x38), Some(TypeId::Int4));
        assert_eq!(TypeId::from_u8(0xE7), Some(TypeId::NVarChar));
        assert_eq!(TypeId::from_u8(0x3A), Some(TypeId::DateTime4));
        assert_eq!(TypeId::from_u8(0x3F), Some(TypeId::Numeric));
        assert_eq!(TypeId::from_u8(0x99), None);
    }

    #[test]
    fn test_every_id_roundtrips_through_its_byte() {
        for byte in 0..=u8::MAX {
            if let Some(id) = TypeId::from_u8(byte) {
                assert_eq!(id as u8, byte);
            }
        }
    }

    #[test]
    fn test_fixed_length_detection() {
        assert!(TypeId::Int4.is_fixed_length());
        assert!(TypeId::Float8.is_fixed_length());
        assert_eq!(TypeId::Null.fixed_size(), Some(0));
        assert!(!TypeId::NVarChar.is_fixed_length());
        assert!(!TypeId::IntN.is_fixed_length());
    }
}
