//! TDS protocol and server product versions.

use core::fmt;

/// TDS protocol version.
///
/// Sent in Login7 and echoed by the server in LOGINACK. The raw value is
/// the big-endian interface number; Login7 writes it little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.2 (SQL Server 2005)
    pub const V7_2: Self = Self(0x7209_0002);

    /// TDS 7.3A (SQL Server 2008)
    pub const V7_3A: Self = Self(0x730A_0003);

    /// TDS 7.3B (SQL Server 2008 R2)
    pub const V7_3B: Self = Self(0x730B_0003);

    /// TDS 7.4 (SQL Server 2012+)
    pub const V7_4: Self = Self(0x7400_0004);

    /// Create a new TDS version from its raw value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check if this version supports DATE, TIME, DATETIME2, and DATETIMEOFFSET types.
    #[must_use]
    pub const fn supports_date_time_types(self) -> bool {
        self.0 >= Self::V7_3A.0
    }

    /// Major protocol number (always 7 for the versions above).
    #[must_use]
    pub const fn major(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// Minor protocol number.
    #[must_use]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 24) & 0x0F) as u8
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x730A_0003 => write!(f, "TDS 7.3A"),
            0x730B_0003 => write!(f, "TDS 7.3B"),
            _ => write!(f, "TDS {}.{}", self.major(), self.minor()),
        }
    }
}

/// SQL Server product version.
///
/// Reported in the pre-login VERSION option and in LOGINACK. This is not the
/// protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServerVersion {
    /// Major version (e.g. 16 for SQL Server 2022).
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number (pre-login only).
    pub sub_build: u16,
}

impl ServerVersion {
    /// Build from the `[major][minor][build_hi][build_lo]` layout.
    #[must_use]
    pub const fn from_raw(raw: u32, sub_build: u16) -> Self {
        Self {
            major: (raw >> 24) as u8,
            minor: (raw >> 16) as u8,
            build: raw as u16,
            sub_build,
        }
    }

    /// The packed `[major][minor][build_hi][build_lo]` value.
    #[must_use]
    pub const fn raw(&self) -> u32 {
        ((self.major as u32) << 24) | ((self.minor as u32) << 16) | self.build as u32
    }

    /// Marketing name for the major version.
    #[must_use]
    pub const fn product_name(&self) -> &'static str {
        match self.major {
            11 => "SQL Server 2012",
            12 => "SQL Server 2014",
            13 => "SQL Server 2016",
            14 => "SQL Server 2017",
            15 => "SQL Server 2019",
            16 => "SQL Server 2022",
            _ => "SQL Server",
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(TdsVersion::V7_4 > TdsVersion::V7_3B);
        assert!(TdsVersion::V7_3B > TdsVersion::V7_3A);
        assert!(!TdsVersion::V7_2.supports_date_time_types());
        assert!(TdsVersion::V7_3A.supports_date_time_types());
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V7_4.to_string(), "TDS 7.4");
        assert_eq!(TdsVersion::V7_3B.to_string(), "TDS 7.3B");
    }

    #[test]
    fn test_server_version_raw() {
        let version = ServerVersion::from_raw(0x1000_0FA0, 0);
        assert_eq!(version.major, 16);
        assert_eq!(version.build, 4000);
        assert_eq!(version.raw(), 0x1000_0FA0);
        assert_eq!(version.to_string(), "16.0.4000");
        assert_eq!(version.product_name(), "SQL Server 2022");
    }
}
