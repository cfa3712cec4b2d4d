//! The uniform transport contract shared by every wire implementation.
//!
//! A transport moves whole JSON message frames in both directions.  The
//! outbound side is `send(bytes)`; the inbound side is a lazy stream of
//! frames handed out once by [`Transport::start`].  Closing (or dropping)
//! a transport terminates the inbound stream cleanly — consumers observe
//! end-of-stream, never an error.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;

/// A lazy sequence of inbound frames, each a complete JSON message.
pub type InboundStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Errors surfaced by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed its end of the pipe; writes raise `EPIPE`-class
    /// errors which are translated here instead of killing the process.
    #[error("broken pipe: {0}")]
    PipeError(String),
    /// A spawned server process exited before or during the exchange.
    #[error("process terminated: {0}")]
    ProcessTerminated(String),
    /// The transport was closed locally; no further sends are possible.
    #[error("transport closed")]
    Closed,
    /// A frame could not be assembled or violated the framing rules.
    #[error("framing error: {0}")]
    Framing(String),
    /// An HTTP exchange returned a status outside the 2xx/3xx range.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// The remote rejected our credentials even after a refresh.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// An SSE stream could not be parsed.
    #[error("SSE parse failure: {0}")]
    SseParse(String),
    /// An underlying I/O failure not covered by a more specific variant.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe => TransportError::PipeError(err.to_string()),
            std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// Uniform byte-stream + message contract implemented by every wire.
///
/// Implementations serialize outbound messages in `send` order and deliver
/// inbound messages in receipt order.  `start` may be called once; it opens
/// the underlying resource and yields the inbound frame stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the transport and return its inbound frame stream.
    async fn start(&mut self) -> Result<InboundStream, TransportError>;

    /// Queue one complete JSON message for delivery.
    async fn send(&self, message: &[u8]) -> Result<(), TransportError>;

    /// Close the underlying resource.  The inbound stream terminates
    /// cleanly; in-flight reads observe end-of-stream.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound line policy applied before frames reach the JSON-RPC codec.
///
/// Misbehaving stdio servers sometimes write log noise to the same stream
/// that carries protocol messages.  The filter drops lines that cannot be
/// the start of a JSON document.  Enabled by default.
#[derive(Debug, Clone, Copy)]
pub struct MessageFilter {
    enabled: bool,
}

impl MessageFilter {
    /// Filter that discards non-JSON lines (the default policy).
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    /// Filter that passes every line through untouched.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Whether `line` should be handed to the codec.
    pub fn accepts(&self, line: &str) -> bool {
        if !self.enabled {
            return true;
        }
        matches!(line.trim_start().bytes().next(), Some(b'{') | Some(b'['))
    }
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self::enabled()
    }
}
