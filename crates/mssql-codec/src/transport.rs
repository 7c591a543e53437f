//! Message-level halves of a split transport.
//!
//! [`MessageStream`] yields whole inbound messages: packets are framed by
//! [`TdsCodec`] and joined by a [`MessageAssembler`]. [`MessageWriter`]
//! numbers and splits outbound payloads into packets of a given size.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::SinkExt;
use pin_project_lite::pin_project;
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::CodecError;
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::{Packet, TdsCodec};

pin_project! {
    /// Stream of reassembled inbound messages.
    ///
    /// Ends with `None` only on a clean end of stream between messages; an
    /// end of stream inside a message yields [`CodecError::UnexpectedEof`].
    pub struct MessageStream<T> {
        #[pin]
        packets: FramedRead<T, TdsCodec>,
        assembler: MessageAssembler,
    }
}

impl<T> MessageStream<T>
where
    T: AsyncRead,
{
    /// Read messages from `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            packets: FramedRead::new(transport, TdsCodec::new()),
            assembler: MessageAssembler::new(),
        }
    }

    /// Check if part of a message has been received.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.assembler.has_partial()
    }
}

impl<T> Stream for MessageStream<T>
where
    T: AsyncRead,
{
    type Item = Result<Message, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            let packet = match ready!(this.packets.as_mut().poll_next(cx)) {
                Some(Ok(packet)) => packet,
                Some(Err(e)) => {
                    this.assembler.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                None if this.assembler.has_partial() => {
                    this.assembler.clear();
                    return Poll::Ready(Some(Err(CodecError::UnexpectedEof)));
                }
                None => return Poll::Ready(None),
            };
            if let Some(message) = this.assembler.push(packet).transpose() {
                return Poll::Ready(Some(message));
            }
        }
    }
}

impl<T> std::fmt::Debug for MessageStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("assembler", &self.assembler)
            .finish_non_exhaustive()
    }
}

/// Sink side of a transport, one message at a time.
pub struct MessageWriter<T> {
    packets: FramedWrite<T, TdsCodec>,
}

impl<T> MessageWriter<T>
where
    T: AsyncWrite + Unpin,
{
    /// Write messages to `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            packets: FramedWrite::new(transport, TdsCodec::new()),
        }
    }

    /// Write `payload` as one message and flush it.
    ///
    /// Each packet carries at most `packet_size - 8` payload bytes, packet
    /// numbers start at 1 and only the last packet has `END_OF_MESSAGE`.
    /// An empty payload is one empty packet. Returns the packet count.
    pub async fn write_message(
        &mut self,
        packet_type: PacketType,
        payload: &[u8],
        packet_size: usize,
    ) -> Result<usize, CodecError> {
        let capacity = packet_size - PACKET_HEADER_SIZE;
        let count = payload.len().div_ceil(capacity).max(1);
        self.packets.encoder_mut().reset_packet_id();

        for (index, chunk) in chunks_or_empty(payload, capacity).enumerate() {
            let status = if index + 1 == count {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            let header = PacketHeader::new(packet_type, status, 0);
            self.packets.feed(Packet::new(header, BytesMut::from(chunk))).await?;
        }
        self.packets.flush().await?;
        Ok(count)
    }

    /// Write an Attention signal: a lone header with `END_OF_MESSAGE`.
    pub async fn write_attention(&mut self) -> Result<(), CodecError> {
        self.write_message(PacketType::Attention, &[], PACKET_HEADER_SIZE + 1)
            .await
            .map(|_| ())
    }

    /// Flush and shut down the transport.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        self.packets.close().await
    }
}

impl<T> std::fmt::Debug for MessageWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("codec", self.packets.encoder())
            .finish_non_exhaustive()
    }
}

fn chunks_or_empty(payload: &[u8], capacity: usize) -> impl Iterator<Item = &[u8]> {
    let empty = payload.is_empty().then_some(payload);
    payload.chunks(capacity).chain(empty)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_writer_output_reads_back_as_one_message() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = MessageWriter::new(client);
        let mut stream = MessageStream::new(server);

        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let count = writer
            .write_message(PacketType::TabularResult, &payload, 1024)
            .await
            .unwrap();
        assert_eq!(count, 3);

        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], &payload[..]);
        assert!(!stream.has_partial());
    }

    #[tokio::test]
    async fn test_attention_is_a_bare_header() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = MessageWriter::new(client);
        writer.write_attention().await.unwrap();
        writer.close().await.unwrap();

        let mut packets = FramedRead::new(server, TdsCodec::new());
        let packet = packets.next().await.unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::Attention);
        assert_eq!(packet.total_size(), PACKET_HEADER_SIZE);
        assert!(packet.is_end_of_message());
        assert!(packets.next().await.is_none());
    }

    #[tokio::test]
    async fn test_clean_close_ends_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = MessageWriter::new(client);
        writer.write_message(PacketType::TabularResult, b"x", 512).await.unwrap();
        writer.close().await.unwrap();
        drop(writer);

        let mut stream = MessageStream::new(server);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
    }
}
