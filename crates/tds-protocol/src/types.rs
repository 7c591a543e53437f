//! Column-level type definitions.
//!
//! Type ids and type descriptors live in `mssql-types`; this module adds the
//! COLMETADATA column flags and re-exports the type id for token consumers.

use bitflags::bitflags;

pub use mssql_types::{LengthKind, TypeId};

bitflags! {
    /// Column flags from COLMETADATA and RETURNVALUE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column is nullable.
        const NULLABLE = 0x0001;
        /// Column uses case-sensitive comparison.
        const CASE_SENSITIVE = 0x0002;
        /// Column is read-write.
        const UPDATEABLE = 0x0004;
        /// Updateability is unknown.
        const UPDATEABLE_UNKNOWN = 0x0008;
        /// Column is an identity column.
        const IDENTITY = 0x0010;
        /// Column is computed.
        const COMPUTED = 0x0020;
        /// Column has a fixed-length CLR type.
        const FIXED_LEN_CLR_TYPE = 0x0100;
        /// Column is a sparse column set.
        const SPARSE_COLUMN_SET = 0x0200;
        /// Column is encrypted.
        const ENCRYPTED = 0x0400;
        /// Column is hidden (browse mode).
        const HIDDEN = 0x2000;
        /// Column is part of a key (browse mode).
        const KEY = 0x4000;
        /// Nullability is unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}

/// Update mode for a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Updateable {
    /// Column is read-only.
    #[default]
    ReadOnly,
    /// Column is read-write.
    ReadWrite,
    /// Updateability unknown.
    Unknown,
}

impl ColumnFlags {
    /// Whether the column accepts NULL.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.contains(Self::NULLABLE)
    }

    /// Whether the column is an identity column.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.contains(Self::IDENTITY)
    }

    /// The two-bit update mode.
    #[must_use]
    pub fn updateable(&self) -> Updateable {
        match (self.bits() >> 2) & 0x03 {
            0 => Updateable::ReadOnly,
            1 => Updateable::ReadWrite,
            _ => Updateable::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_flags_from_wire() {
        let flags = ColumnFlags::from_bits_retain(0x0015);
        assert!(flags.is_nullable());
        assert!(flags.is_identity());
        assert_eq!(flags.updateable(), Updateable::ReadWrite);
    }

    #[test]
    fn test_column_flags_unknown_bits_retained() {
        let flags = ColumnFlags::from_bits_retain(0x1009);
        assert_eq!(flags.bits(), 0x1009);
        assert_eq!(flags.updateable(), Updateable::Unknown);
    }
}
