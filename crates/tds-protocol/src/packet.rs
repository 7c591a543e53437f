//! The 8-byte header that starts every packet.
//!
//! ```text
//! offset  0     1       2..4          4..6        6          7
//!         type  status  length (BE)   spid (BE)   packet id  window
//! ```
//!
//! `length` counts the header itself, so it is never below 8.

use bitflags::bitflags;
use bytes::BufMut;
use mssql_types::WireCursor;

use crate::error::ProtocolError;

/// Header size; also the smallest valid packet.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Smallest packet size a client may negotiate.
pub const MIN_PACKET_SIZE: usize = 512;

/// Largest packet size a client may negotiate.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Packet size used until the server's ENVCHANGE says otherwise.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Message type carried in header byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch text.
    SqlBatch = 0x01,
    /// RPC request.
    Rpc = 0x03,
    /// Every server response.
    TabularResult = 0x04,
    /// Out-of-band cancel.
    Attention = 0x06,
    /// BEGIN/COMMIT/ROLLBACK request.
    TransactionManager = 0x0E,
    /// Login7 record.
    Tds7Login = 0x10,
    /// Pre-login handshake, in both directions.
    PreLogin = 0x12,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x01 => Self::SqlBatch,
            0x03 => Self::Rpc,
            0x04 => Self::TabularResult,
            0x06 => Self::Attention,
            0x0E => Self::TransactionManager,
            0x10 => Self::Tds7Login,
            0x12 => Self::PreLogin,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        })
    }
}

bitflags! {
    /// Header byte 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets of this message follow.
        const NORMAL = 0x00;
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Message type.
    pub packet_type: PacketType,
    /// Status bits.
    pub status: PacketStatus,
    /// Header plus payload, in bytes.
    pub length: u16,
    /// Server process id; zero from clients.
    pub spid: u16,
    /// Position within the message, from 1, modulo 256.
    pub packet_id: u8,
    /// Always zero.
    pub window: u8,
}

impl PacketHeader {
    /// Header with zero spid, packet id and window.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Read a header; unknown types, unknown status bits and a length
    /// below 8 are errors.
    pub fn decode(src: &mut WireCursor) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }
        let packet_type = PacketType::try_from(src.read_u8()?)?;
        let status = src.read_u8()?;
        let status =
            PacketStatus::from_bits(status).ok_or(ProtocolError::InvalidPacketStatus(status))?;
        let length = src.read_u16_be()?;
        if usize::from(length) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacketLength(length));
        }
        Ok(Self {
            packet_type,
            status,
            length,
            spid: src.read_u16_be()?,
            packet_id: src.read_u8()?,
            window: src.read_u8()?,
        })
    }

    /// Write the 8 header bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Whether this packet closes its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Same header with another packet id.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn decode(raw: &'static [u8]) -> Result<PacketHeader, ProtocolError> {
        PacketHeader::decode(&mut WireCursor::from(raw))
    }

    #[test]
    fn test_header_wire_layout() {
        let header = PacketHeader {
            spid: 54,
            ..PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0x0123)
                .with_packet_id(7)
        };

        let mut bytes = BytesMut::new();
        header.encode(&mut bytes);
        assert_eq!(&bytes[..], &[0x01, 0x01, 0x01, 0x23, 0x00, 0x36, 0x07, 0x00]);
        assert_eq!(
            PacketHeader::decode(&mut WireCursor::new(bytes.freeze())).unwrap(),
            header
        );
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            decode(&[0x04, 0x01, 0x00, 0x07, 0x00, 0x00, 0x01, 0x00]),
            Err(ProtocolError::InvalidPacketLength(7))
        ));
        assert!(matches!(
            decode(&[0x04, 0x80, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00]),
            Err(ProtocolError::InvalidPacketStatus(0x80))
        ));
        assert!(matches!(
            decode(&[0x42, 0x01, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00]),
            Err(ProtocolError::InvalidPacketType(0x42))
        ));
        assert!(decode(&[0x04, 0x01, 0x00]).unwrap_err().is_truncation());
    }

    #[test]
    fn test_packet_type_codes() {
        for ty in [
            PacketType::SqlBatch,
            PacketType::Rpc,
            PacketType::TabularResult,
            PacketType::Attention,
            PacketType::TransactionManager,
            PacketType::Tds7Login,
            PacketType::PreLogin,
        ] {
            assert_eq!(PacketType::try_from(ty as u8).unwrap(), ty);
        }
    }
}
