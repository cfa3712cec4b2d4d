//! In-process pipe transport.
//!
//! A [`PipeTransport::pair`] yields two connected endpoints backed by
//! [`tokio::io::duplex`] byte pipes, framed exactly like the stdio
//! transport.  The pair stands in for a client/server process boundary in
//! tests and for same-process embedding of an MCP server.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::stdio::{spawn_reader, write_message};
use crate::transport::{InboundStream, MessageFilter, Transport, TransportError};

/// Per-direction byte capacity of the underlying duplex pipes.
const PIPE_CAPACITY: usize = 256 * 1024;

const INBOUND_CHANNEL_CAPACITY: usize = 256;

type WriterHalf = Box<dyn AsyncWrite + Send + Unpin>;
type ReaderHalf = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// One endpoint of an in-process transport pair.
pub struct PipeTransport {
    writer: Arc<Mutex<Option<WriterHalf>>>,
    reader: Option<ReaderHalf>,
    filter: MessageFilter,
    reader_task: Option<JoinHandle<()>>,
}

impl PipeTransport {
    /// Create a connected endpoint pair.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rpc::pipe::PipeTransport;
    ///
    /// let (_client_side, _server_side) = PipeTransport::pair();
    /// ```
    pub fn pair() -> (Self, Self) {
        let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        (
            Self::from_halves(Box::new(left_read), Box::new(left_write)),
            Self::from_halves(Box::new(right_read), Box::new(right_write)),
        )
    }

    fn from_halves(reader: ReaderHalf, writer: WriterHalf) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
            reader: Some(reader),
            filter: MessageFilter::default(),
            reader_task: None,
        }
    }

    /// Override the inbound noise-filter policy.
    pub fn with_filter(mut self, filter: MessageFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[async_trait::async_trait]
impl Transport for PipeTransport {
    async fn start(&mut self) -> Result<InboundStream, TransportError> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| TransportError::Framing("transport already started".to_string()))?;
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        self.reader_task = Some(spawn_reader(reader, self.filter, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        write_message(writer, message).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.lock().await.take();
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        Ok(())
    }
}
