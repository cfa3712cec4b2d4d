//! Streamable HTTP client transport.
//!
//! Each outbound JSON-RPC message is POSTed to the server URL.  The server
//! answers either with a single JSON body or with a `text/event-stream`
//! response whose `data:` lines are JSON-RPC messages; the transport picks
//! the handling path from the response `Content-Type`.  Both paths feed the
//! same inbound frame stream, so callers consume responses uniformly.
//!
//! Connections are reused through the shared [`reqwest::Client`] pool.
//! Authentication is injected per request by an optional [`HeaderSource`];
//! a `401` triggers one `on_unauthorized` round (token refresh) followed by
//! a single retry.
//!
//! # Example
//!
//! ```rust,no_run
//! use rpc::http::StreamableHttpTransport;
//! use rpc::transport::Transport;
//!
//! # async {
//! let mut transport = StreamableHttpTransport::new("https://mcp.example.com/mcp")
//!     .with_request_timeout(std::time::Duration::from_secs(30));
//! let inbound = transport.start().await.unwrap();
//! # };
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::sse::SseParser;
use crate::transport::{InboundStream, Transport, TransportError};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default SSE idle timeout: a stream with no traffic for this long is
/// considered dead and closed.
pub const DEFAULT_SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Supplies per-request headers (typically `Authorization`).
///
/// Implemented by the auth providers; the transport stays ignorant of the
/// scheme behind the header values.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Headers to attach to the next outbound request.
    async fn headers(&self) -> Result<HashMap<String, String>, TransportError>;

    /// Called once after a `401` response.  Return `true` when credentials
    /// were refreshed and the request is worth retrying.
    async fn on_unauthorized(&self) -> bool {
        false
    }
}

/// HTTP transport speaking the Streamable HTTP flavor of JSON-RPC.
pub struct StreamableHttpTransport {
    url: String,
    client: reqwest::Client,
    header_source: Option<Arc<dyn HeaderSource>>,
    request_timeout: Duration,
    sse_idle_timeout: Duration,
    max_retries: u32,
    listen: bool,
    inbound_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    sse_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamableHttpTransport {
    /// Create a transport targeting `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .tcp_keepalive(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            header_source: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sse_idle_timeout: DEFAULT_SSE_IDLE_TIMEOUT,
            max_retries: 0,
            listen: false,
            inbound_tx: Mutex::new(None),
            sse_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Retry transient failures (connection errors and 5xx responses) up
    /// to `retries` extra attempts with linear backoff.  Defaults to 0.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Also open a standing `GET` SSE stream on `start` and feed its
    /// events into the inbound sequence.  Servers use that stream for
    /// notifications they cannot attach to a request/response exchange.
    pub fn with_notification_listener(mut self) -> Self {
        self.listen = true;
        self
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the SSE idle timeout.
    pub fn with_sse_idle_timeout(mut self, timeout: Duration) -> Self {
        self.sse_idle_timeout = timeout;
        self
    }

    /// Attach a header source consulted before every request.
    pub fn with_header_source(mut self, source: Arc<dyn HeaderSource>) -> Self {
        self.header_source = Some(source);
        self
    }

    /// The server URL this transport POSTs to.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn build_request(&self, message: &[u8]) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.request_timeout)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message.to_vec());

        if let Some(source) = &self.header_source {
            for (name, value) in source.headers().await? {
                request = request.header(name, value);
            }
        }
        Ok(request)
    }

    async fn post_once(&self, message: &[u8]) -> Result<reqwest::Response, TransportError> {
        self.build_request(message)
            .await?
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn dispatch(&self, message: &[u8]) -> Result<reqwest::Response, TransportError> {
        let mut attempt: u32 = 0;
        let response = loop {
            let backoff = Duration::from_millis(100 * (attempt + 1) as u64);
            match self.post_once(message).await {
                Ok(response)
                    if response.status().is_server_error() && attempt < self.max_retries =>
                {
                    log::warn!(
                        "POST {} returned {}; retry {}/{}",
                        self.url,
                        response.status(),
                        attempt + 1,
                        self.max_retries
                    );
                }
                Ok(response) => break response,
                Err(err) if attempt < self.max_retries => {
                    log::warn!(
                        "POST {} failed ({}); retry {}/{}",
                        self.url,
                        err,
                        attempt + 1,
                        self.max_retries
                    );
                }
                Err(err) => return Err(err),
            }
            attempt += 1;
            tokio::time::sleep(backoff).await;
        };

        if response.status().as_u16() != 401 {
            return Ok(response);
        }

        // One refresh round, one retry; a second 401 is final.
        if let Some(source) = &self.header_source {
            if source.on_unauthorized().await {
                let retried = self.post_once(message).await?;
                if retried.status().as_u16() != 401 {
                    return Ok(retried);
                }
            }
        }
        Err(TransportError::Unauthorized(format!(
            "server {} rejected credentials",
            self.url
        )))
    }

    fn spawn_sse_reader(
        &self,
        response: reqwest::Response,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> JoinHandle<()> {
        let idle_timeout = self.sse_idle_timeout;
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut body = response.bytes_stream();
            loop {
                let chunk = match tokio::time::timeout(idle_timeout, body.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(err))) => {
                        log::debug!("SSE stream error: {}", err);
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        log::debug!("SSE stream idle for {:?}; closing", idle_timeout);
                        break;
                    }
                };
                for event in parser.feed(&chunk) {
                    if event.data.is_empty() {
                        continue;
                    }
                    if tx.send(event.data.into_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn start(&mut self) -> Result<InboundStream, TransportError> {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        *self.inbound_tx.lock().await = Some(tx.clone());

        if self.listen {
            let mut request = self
                .client
                .get(&self.url)
                .header("Accept", "text/event-stream");
            if let Some(source) = &self.header_source {
                for (name, value) in source.headers().await? {
                    request = request.header(name, value);
                }
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let task = self.spawn_sse_reader(response, tx);
                    self.sse_tasks.lock().await.push(task);
                }
                Ok(response) => {
                    log::warn!(
                        "notification stream on {} refused with {}",
                        self.url,
                        response.status()
                    );
                }
                Err(err) => {
                    log::warn!("notification stream on {} failed: {}", self.url, err);
                }
            }
        }

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        let response = self.dispatch(message).await?;
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let tx = match self.inbound_tx.lock().await.clone() {
            Some(tx) => tx,
            // Not started: fire-and-forget (notification-only usage).
            None => return Ok(()),
        };

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            let task = self.spawn_sse_reader(response, tx);
            self.sse_tasks.lock().await.push(task);
            return Ok(());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if !body.iter().all(|b| b.is_ascii_whitespace()) {
            let _ = tx.send(body.to_vec()).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inbound_tx.lock().await.take();
        for task in self.sse_tasks.lock().await.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::sse::{Event, Sse};
    use axum::routing::post;
    use axum::{Json, Router};
    use futures_util::stream;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/mcp", addr)
    }

    #[tokio::test]
    async fn test_json_response_reaches_inbound() {
        let router = Router::new().route(
            "/mcp",
            post(|Json(request): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": {"ok": true}
                }))
            }),
        );
        let url = serve(router).await;

        let mut transport = StreamableHttpTransport::new(url);
        let mut inbound = transport.start().await.unwrap();
        transport
            .send(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .await
            .unwrap();

        let frame = inbound.next().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"]["ok"], true);
    }

    #[tokio::test]
    async fn test_sse_response_streams_messages() {
        let router = Router::new().route(
            "/mcp",
            post(|| async {
                let events = stream::iter(vec![
                    Ok::<_, std::convert::Infallible>(
                        Event::default().data(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#),
                    ),
                    Ok(Event::default().data(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)),
                ]);
                Sse::new(events)
            }),
        );
        let url = serve(router).await;

        let mut transport = StreamableHttpTransport::new(url);
        let mut inbound = transport.start().await.unwrap();
        transport
            .send(br#"{"jsonrpc":"2.0","id":1,"method":"tools/call"}"#)
            .await
            .unwrap();

        let first: serde_json::Value =
            serde_json::from_slice(&inbound.next().await.unwrap()).unwrap();
        assert_eq!(first["method"], "notifications/progress");
        let second: serde_json::Value =
            serde_json::from_slice(&inbound.next().await.unwrap()).unwrap();
        assert_eq!(second["id"], 1);
    }

    #[tokio::test]
    async fn test_http_error_status_is_typed() {
        let router = Router::new().route(
            "/mcp",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let url = serve(router).await;

        let mut transport = StreamableHttpTransport::new(url);
        let _inbound = transport.start().await.unwrap();
        let err = transport.send(b"{}").await.unwrap_err();
        match err {
            TransportError::HttpStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected HttpStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_5xx_retried_up_to_limit() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/mcp",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            axum::http::StatusCode::SERVICE_UNAVAILABLE,
                            r#"{}"#.to_string(),
                        )
                    } else {
                        (
                            axum::http::StatusCode::OK,
                            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string(),
                        )
                    }
                }
            }),
        );
        let url = serve(router).await;

        let mut transport = StreamableHttpTransport::new(url).with_max_retries(2);
        let mut inbound = transport.start().await.unwrap();
        transport
            .send(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let frame: serde_json::Value =
            serde_json::from_slice(&inbound.next().await.unwrap()).unwrap();
        assert_eq!(frame["id"], 1);
    }

    #[tokio::test]
    async fn test_unauthorized_after_refresh_fails() {
        struct StaticSource;
        #[async_trait]
        impl HeaderSource for StaticSource {
            async fn headers(&self) -> Result<HashMap<String, String>, TransportError> {
                Ok(HashMap::from([(
                    "Authorization".to_string(),
                    "Bearer stale".to_string(),
                )]))
            }
            async fn on_unauthorized(&self) -> bool {
                true
            }
        }

        let router = Router::new().route(
            "/mcp",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "nope") }),
        );
        let url = serve(router).await;

        let mut transport =
            StreamableHttpTransport::new(url).with_header_source(Arc::new(StaticSource));
        let _inbound = transport.start().await.unwrap();
        let err = transport.send(b"{}").await.unwrap_err();
        assert!(matches!(err, TransportError::Unauthorized(_)));
    }
}
