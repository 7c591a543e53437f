//! Split I/O connection.
//!
//! The transport is split into read and write halves so that an Attention
//! packet can be sent while a read of the current response is pending.
//! Whether a request is outstanding is shared with every [`CancelHandle`];
//! attention is only ever sent for an outstanding request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use futures_util::StreamExt;
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PacketType};
use tds_protocol::{Token, TokenStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};

use crate::error::CodecError;
use crate::message::Message;
use crate::transport::{MessageStream, MessageWriter};

const IDLE: u8 = 0;
const IN_FLIGHT: u8 = 1;
const CANCELLING: u8 = 2;

/// Request lifecycle shared between a connection and its cancel handles.
#[derive(Debug, Default)]
struct RequestState(AtomicU8);

impl RequestState {
    fn begin(&self) {
        self.0.store(IN_FLIGHT, Ordering::Release);
    }

    /// Claim the outstanding request for cancellation. False when there is
    /// none or attention was already sent.
    fn start_cancel(&self) -> bool {
        self.0
            .compare_exchange(IN_FLIGHT, CANCELLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record that the response arrived. False when attention went out
    /// first and the response must be discarded.
    fn complete(&self) -> bool {
        match self
            .0
            .compare_exchange(IN_FLIGHT, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current != CANCELLING,
        }
    }

    fn reset(&self) {
        self.0.store(IDLE, Ordering::Release);
    }

    fn is_in_flight(&self) -> bool {
        self.0.load(Ordering::Acquire) == IN_FLIGHT
    }

    fn is_cancelling(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLING
    }
}

/// A TDS connection that sends and receives whole logical messages.
///
/// Outbound messages are split into packets of the negotiated size;
/// inbound packets are reassembled until `END_OF_MESSAGE`.
///
/// # Example
///
/// ```rust,ignore
/// use mssql_codec::Connection;
/// use tds_protocol::PacketType;
///
/// let mut conn = Connection::new(tcp_stream);
/// conn.send_message(PacketType::SqlBatch, payload).await?;
/// let response = conn.read_message().await?;
/// ```
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: MessageStream<ReadHalf<T>>,
    /// Shared with cancel handles.
    writer: Arc<Mutex<MessageWriter<WriteHalf<T>>>>,
    packet_size: usize,
    /// Signalled when an attention is acknowledged.
    cancel_notify: Arc<Notify>,
    request: Arc<RequestState>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new connection from a transport using the default packet size.
    pub fn new(transport: T) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: MessageStream::new(read_half),
            writer: Arc::new(Mutex::new(MessageWriter::new(write_half))),
            packet_size: DEFAULT_PACKET_SIZE,
            cancel_notify: Arc::new(Notify::new()),
            request: Arc::new(RequestState::default()),
        }
    }

    /// Create a connection with a custom packet size for outbound messages.
    pub fn with_packet_size(transport: T, packet_size: usize) -> Self {
        let mut conn = Self::new(transport);
        conn.set_packet_size(packet_size);
        conn
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Replace the packet size used for later sends.
    ///
    /// Values are clamped to the protocol range `512..=32767`.
    pub fn set_packet_size(&mut self, size: usize) {
        let size = size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        if size != self.packet_size {
            tracing::debug!(old = self.packet_size, new = size, "packet size changed");
        }
        self.packet_size = size;
    }

    /// Get a handle for cancelling requests on this connection.
    ///
    /// The handle can be cloned and sent to other tasks.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.cancel_notify),
            request: Arc::clone(&self.request),
        }
    }

    /// Check if a request has been sent and its response not yet read.
    #[must_use]
    pub fn is_request_in_flight(&self) -> bool {
        self.request.is_in_flight()
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.request.is_cancelling()
    }

    /// Check if part of an inbound message is buffered.
    #[must_use]
    pub fn has_partial_message(&self) -> bool {
        self.reader.has_partial()
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` when a cancel handle signalled attention: the rest
    /// of the interrupted response is discarded up to the server's
    /// acknowledgement. End of stream between messages is
    /// [`CodecError::ConnectionClosed`]; inside a message it is
    /// [`CodecError::UnexpectedEof`].
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        if self.is_cancelling() {
            self.drain_after_cancel().await?;
            return Ok(None);
        }
        let message = self.next_message().await?;
        if self.request.complete() {
            return Ok(Some(message));
        }
        // Attention went out while this response was in flight.
        if acknowledges_attention(&message)? {
            self.finish_cancel();
        } else {
            self.drain_after_cancel().await?;
        }
        Ok(None)
    }

    async fn next_message(&mut self) -> Result<Message, CodecError> {
        self.reader
            .next()
            .await
            .unwrap_or(Err(CodecError::ConnectionClosed))
    }

    /// Send a request message, splitting it into packets.
    ///
    /// Each packet carries at most `packet_size - 8` payload bytes, packet
    /// numbers start at 1 and `END_OF_MESSAGE` is set on the last packet
    /// only. An empty payload is sent as a single empty packet. The request
    /// stays outstanding until [`read_message`](Self::read_message) returns
    /// its response. A cancellation still being acknowledged is drained
    /// first.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<(), CodecError> {
        if self.is_cancelling() {
            self.drain_after_cancel().await?;
        }
        self.request.begin();

        let mut writer = self.writer.lock().await;
        let packets = writer
            .write_message(packet_type, &payload, self.packet_size)
            .await?;
        tracing::trace!(
            packet_type = ?packet_type,
            length = payload.len(),
            packets,
            "message sent"
        );
        Ok(())
    }

    /// Interrupt the outstanding request and wait for the server's
    /// acknowledgement, discarding every token before it.
    ///
    /// Does nothing when no request is outstanding.
    pub async fn cancel(&mut self) -> Result<(), CodecError> {
        self.cancel_handle().cancel().await?;
        if self.is_cancelling() {
            self.drain_after_cancel().await?;
        }
        Ok(())
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.writer.lock().await.close().await
    }

    /// Read messages until one acknowledges the attention.
    async fn drain_after_cancel(&mut self) -> Result<(), CodecError> {
        tracing::debug!("draining response after attention");

        let result = loop {
            let message = match self.next_message().await {
                Ok(message) => message,
                Err(e) => break Err(e),
            };
            match acknowledges_attention(&message) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
        };

        self.finish_cancel();
        if result.is_ok() {
            tracing::debug!("attention acknowledged");
        }
        result
    }

    fn finish_cancel(&self) {
        self.request.reset();
        self.cancel_notify.notify_waiters();
    }
}

/// Check whether a response message carries a DONE with the attention bit.
fn acknowledges_attention(message: &Message) -> Result<bool, CodecError> {
    if message.packet_type != PacketType::TabularResult {
        return Ok(false);
    }
    for token in TokenStream::new(message.payload.clone()) {
        match token? {
            Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done)
                if done.is_attention() =>
            {
                return Ok(true);
            }
            _ => {}
        }
    }
    Ok(false)
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.packet_size)
            .field("request", &self.request)
            .field("has_partial_message", &self.reader.has_partial())
            .finish_non_exhaustive()
    }
}

/// Handle for cancelling a request from another task.
pub struct CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<MessageWriter<WriteHalf<T>>>>,
    notify: Arc<Notify>,
    request: Arc<RequestState>,
}

impl<T> CancelHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send an Attention packet for the outstanding request.
    ///
    /// Returns `Ok(false)` without writing anything when no request is
    /// outstanding or attention was already sent. Otherwise the owning
    /// connection's next `read_message` drains the interrupted response and
    /// returns `Ok(None)`.
    pub async fn cancel(&self) -> Result<bool, CodecError> {
        if !self.request.start_cancel() {
            tracing::debug!("no request outstanding, attention not sent");
            return Ok(false);
        }

        tracing::debug!("sending attention");
        self.writer.lock().await.write_attention().await?;
        Ok(true)
    }

    /// Wait until the server acknowledges the attention.
    pub async fn wait_cancelled(&self) {
        let notified = self.notify.notified();
        if self.request.is_cancelling() {
            notified.await;
        }
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.request.is_cancelling()
    }
}

impl<T> Clone for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.notify),
            request: Arc::clone(&self.request),
        }
    }
}

impl<T> std::fmt::Debug for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
