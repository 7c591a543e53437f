//! Joining packets into messages.
//!
//! Packets of one message are numbered 1, 2, ... modulo 256, share one
//! packet type and end with the packet that has `END_OF_MESSAGE` set.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::PacketType;

use crate::error::CodecError;
use crate::packet_codec::Packet;

/// A whole logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Type shared by all packets of the message.
    pub packet_type: PacketType,
    /// Concatenated packet payloads.
    pub payload: Bytes,
}

impl Message {
    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Accumulates packets until a message is complete.
///
/// Any error drops the partial message.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    /// Type and id of the last packet of an unfinished message.
    last: Option<(PacketType, u8)>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a packet; returns the message it completes, if any.
    ///
    /// A packet numbered other than 1 at the start of a message, or other
    /// than its predecessor plus one afterwards, is a
    /// [`CodecError::SequenceGap`]. A continuation of a different type is a
    /// [`CodecError::PacketTypeMismatch`].
    pub fn push(&mut self, packet: Packet) -> Result<Option<Message>, CodecError> {
        let Packet { header, payload } = packet;
        if let Err(e) = self.check(header.packet_type, header.packet_id) {
            self.clear();
            return Err(e);
        }

        self.buffer.extend_from_slice(&payload);
        self.packet_count += 1;
        tracing::trace!(
            packet_type = ?header.packet_type,
            packets = self.packet_count,
            buffered = self.buffer.len(),
            eom = header.is_end_of_message(),
            "packet joined"
        );

        if !header.is_end_of_message() {
            self.last = Some((header.packet_type, header.packet_id));
            return Ok(None);
        }
        self.last = None;
        self.packet_count = 0;
        Ok(Some(Message {
            packet_type: header.packet_type,
            payload: self.buffer.split().freeze(),
        }))
    }

    fn check(&self, packet_type: PacketType, packet_id: u8) -> Result<(), CodecError> {
        let expected = match self.last {
            None => 1,
            Some((first_type, _)) if first_type != packet_type => {
                return Err(CodecError::PacketTypeMismatch {
                    expected: first_type,
                    actual: packet_type,
                });
            }
            Some((_, last_id)) => last_id.wrapping_add(1),
        };
        if packet_id != expected {
            return Err(CodecError::SequenceGap {
                expected,
                actual: packet_id,
            });
        }
        Ok(())
    }

    /// Whether a message has started but not finished.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.last.is_some()
    }

    /// Packets of the unfinished message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Payload bytes of the unfinished message.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop the unfinished message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last = None;
        self.packet_count = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tds_protocol::packet::{PacketHeader, PacketStatus};

    fn packet_of(packet_type: PacketType, id: u8, last: bool, payload: &[u8]) -> Packet {
        let status = if last {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        Packet::new(
            PacketHeader::new(packet_type, status, 0).with_packet_id(id),
            BytesMut::from(payload),
        )
    }

    fn tabular(id: u8, last: bool, payload: &[u8]) -> Packet {
        packet_of(PacketType::TabularResult, id, last, payload)
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();

        let message = assembler.push(tabular(1, true, b"hello")).unwrap().unwrap();
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();

        assert!(assembler.push(tabular(1, false, b"hello ")).unwrap().is_none());
        assert!(assembler.push(tabular(2, false, b"world")).unwrap().is_none());
        assert_eq!(assembler.packet_count(), 2);
        assert_eq!(assembler.buffer_len(), 11);

        let message = assembler.push(tabular(3, true, b"!")).unwrap().unwrap();
        assert_eq!(&message.payload[..], b"hello world!");
        assert_eq!(message.len(), 12);
        assert_eq!(assembler.packet_count(), 0);
    }

    #[test]
    fn test_packet_numbers_wrap() {
        let mut assembler = MessageAssembler::new();

        for id in 1..=255u8 {
            assert!(assembler.push(tabular(id, false, b"a")).unwrap().is_none());
        }
        let message = assembler.push(tabular(0, true, b"b")).unwrap().unwrap();
        assert_eq!(message.len(), 256);
    }

    #[test]
    fn test_sequence_gap() {
        let mut assembler = MessageAssembler::new();

        assembler.push(tabular(1, false, b"a")).unwrap();
        let err = assembler.push(tabular(3, true, b"b")).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SequenceGap {
                expected: 2,
                actual: 3
            }
        ));
        assert!(!assembler.has_partial());
        assert_eq!(assembler.buffer_len(), 0);
    }

    #[test]
    fn test_every_message_starts_at_one() {
        let mut assembler = MessageAssembler::new();

        assert!(assembler.push(tabular(1, true, b"x")).unwrap().is_some());
        assert!(assembler.push(tabular(1, true, b"y")).unwrap().is_some());
        assert!(matches!(
            assembler.push(tabular(7, true, b"z")),
            Err(CodecError::SequenceGap {
                expected: 1,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_continuation_keeps_packet_type() {
        let mut assembler = MessageAssembler::new();

        assembler.push(tabular(1, false, b"a")).unwrap();
        let err = assembler
            .push(packet_of(PacketType::PreLogin, 2, true, b"b"))
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::PacketTypeMismatch {
                expected: PacketType::TabularResult,
                actual: PacketType::PreLogin
            }
        ));
        assert!(!assembler.has_partial());

        // A new message may use any type.
        let message = assembler
            .push(packet_of(PacketType::PreLogin, 1, true, b"c"))
            .unwrap()
            .unwrap();
        assert_eq!(message.packet_type, PacketType::PreLogin);
    }
}
