//! Single-packet framing for tokio-util.
//!
//! [`TdsCodec`] cuts a byte stream into [`Packet`]s using the big-endian
//! length at header offset 2, and on the way out stamps each packet with
//! its real length and the next packet number.

use bytes::{BufMut, BytesMut};
use mssql_types::WireCursor;
use tds_protocol::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// One framed packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Decoded header. On encode, `length` and `packet_id` are overwritten.
    pub header: PacketHeader,
    /// Bytes after the header.
    pub payload: BytesMut,
}

impl Packet {
    /// Pair a header with its payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Header plus payload, as it appears on the wire.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether the packet closes its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Packet codec; a fresh codec numbers outbound packets from 1.
#[derive(Debug)]
pub struct TdsCodec {
    limit: usize,
    next_id: u8,
}

impl TdsCodec {
    /// Codec accepting packets up to the protocol maximum of 32767 bytes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: MAX_PACKET_SIZE,
            next_id: 1,
        }
    }

    /// Lower the largest packet accepted or emitted.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.limit = size.clamp(PACKET_HEADER_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Largest packet accepted or emitted.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.limit
    }

    /// Number the next outbound packet 1, as the first of a message.
    pub fn reset_packet_id(&mut self) {
        self.next_id = 1;
    }

    fn check_length(&self, length: usize) -> Result<(), CodecError> {
        if length < PACKET_HEADER_SIZE {
            Err(CodecError::InvalidHeader)
        } else if length > self.limit {
            Err(CodecError::PacketTooLarge {
                size: length,
                max: self.limit,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Declared packet length, once the header is buffered.
fn declared_length(src: &[u8]) -> Option<usize> {
    match src {
        [_, _, hi, lo, _, _, _, _, ..] => Some(usize::from(u16::from_be_bytes([*hi, *lo]))),
        _ => None,
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let Some(length) = declared_length(src) else {
            return Ok(None);
        };
        self.check_length(length)?;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut payload = src.split_to(length);
        let header = PacketHeader::decode(&mut WireCursor::new(
            payload.split_to(PACKET_HEADER_SIZE).freeze(),
        ))?;
        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "packet in"
        );
        Ok(Some(Packet::new(header, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let packet = self.decode(src)?;
        if packet.is_none() && !src.is_empty() {
            return Err(CodecError::UnexpectedEof);
        }
        Ok(packet)
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        let length = packet.total_size();
        if length > self.limit {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.limit,
            });
        }

        let header = PacketHeader {
            length: length as u16,
            packet_id: self.next_id,
            ..packet.header
        };
        self.next_id = self.next_id.wrapping_add(1);

        dst.reserve(length);
        header.encode(dst);
        dst.put_slice(&packet.payload);
        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "packet out"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tds_protocol::packet::{PacketStatus, PacketType};

    fn wire(length: u16, packet_id: u8, payload: &[u8]) -> BytesMut {
        let mut data = BytesMut::from(&[0x04, 0x01][..]);
        data.put_u16(length);
        data.put_u16(52);
        data.put_u8(packet_id);
        data.put_u8(0);
        data.put_slice(payload);
        data
    }

    fn encode_empty(codec: &mut TdsCodec) -> u8 {
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::NORMAL, 0);
        let mut dst = BytesMut::new();
        codec.encode(Packet::new(header, BytesMut::new()), &mut dst).unwrap();
        dst[6]
    }

    #[test]
    fn test_decode_splits_at_declared_length() {
        let mut codec = TdsCodec::new();
        let mut data = wire(12, 1, b"test");
        data.extend_from_slice(&wire(9, 2, b"c"));

        let first = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(first.header.packet_type, PacketType::TabularResult);
        assert_eq!(first.header.spid, 52);
        assert!(first.is_end_of_message());
        assert_eq!(&first.payload[..], b"test");

        let second = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(second.header.packet_id, 2);
        assert_eq!(&second.payload[..], b"c");
        assert!(data.is_empty());
    }

    #[test]
    fn test_partial_input_waits() {
        let mut codec = TdsCodec::new();
        let mut data = BytesMut::from(&wire(12, 1, b"te")[..5]);
        assert!(codec.decode(&mut data).unwrap().is_none());

        let mut data = wire(12, 1, b"te");
        assert!(codec.decode(&mut data).unwrap().is_none());
        assert_eq!(data.len(), 10);

        assert!(matches!(
            codec.decode_eof(&mut data),
            Err(CodecError::UnexpectedEof)
        ));
        assert!(codec.decode_eof(&mut BytesMut::new()).unwrap().is_none());
    }

    #[test]
    fn test_declared_length_bounds() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        assert!(matches!(
            codec.decode(&mut wire(4, 1, b"")),
            Err(CodecError::InvalidHeader)
        ));
        assert!(matches!(
            codec.decode(&mut wire(600, 1, b"")),
            Err(CodecError::PacketTooLarge { size: 600, max: 512 })
        ));
    }

    #[test]
    fn test_encode_stamps_length_and_number() {
        let mut codec = TdsCodec::new();
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);

        let mut dst = BytesMut::new();
        codec
            .encode(Packet::new(header, BytesMut::from(&b"test"[..])), &mut dst)
            .unwrap();
        assert_eq!(&dst[..8], &[0x01, 0x01, 0x00, 0x0C, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(&dst[8..], b"test");
    }

    #[test]
    fn test_packet_numbers_wrap_through_zero() {
        let mut codec = TdsCodec::new();
        let ids: Vec<u8> = (0..257).map(|_| encode_empty(&mut codec)).collect();
        assert_eq!((ids[0], ids[254], ids[255], ids[256]), (1, 255, 0, 1));

        codec.reset_packet_id();
        assert_eq!(encode_empty(&mut codec), 1);
    }

    #[test]
    fn test_encode_rejects_oversized_packet() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, BytesMut::from(&[0u8; 505][..]));

        let mut dst = BytesMut::new();
        assert!(matches!(
            codec.encode(packet, &mut dst),
            Err(CodecError::PacketTooLarge { size: 513, max: 512 })
        ));
        assert!(dst.is_empty());
    }
}
