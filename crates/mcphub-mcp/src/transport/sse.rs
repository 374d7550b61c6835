//! SSE transport for MCP servers
//!
//! The client opens a `GET` event stream. The server's first `endpoint` event
//! carries the (usually relative) URL that client messages are `POST`ed to;
//! `message` events carry server JSON-RPC messages.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::transport::Transport;
use rmcp::RoleClient;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::supervise;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SseTransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("event stream ended before the endpoint event")]
    NoEndpoint,

    #[error("timed out after {0:?} waiting for the endpoint event")]
    EndpointTimeout(Duration),
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split events, lines and
/// UTF-8 sequences anywhere.
#[derive(Debug, Default)]
pub(crate) struct SseEventParser {
    buffer: Vec<u8>,
}

impl SseEventParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = Self::parse_frame(&String::from_utf8_lossy(&frame)) {
                events.push(event);
            }
        }
        events
    }

    fn parse_frame(frame: &str) -> Option<SseEvent> {
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();

        for line in frame.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event = Some(value.to_string()),
                "data" => data.push(value),
                _ => {}
            }
        }

        if event.is_none() && data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

/// rmcp client transport over a legacy MCP SSE endpoint.
pub struct SseClientTransport {
    server: String,
    http: reqwest::Client,
    endpoint: Url,
    incoming: mpsc::Receiver<ServerJsonRpcMessage>,
    cancel: CancellationToken,
}

impl SseClientTransport {
    /// Open the event stream and wait for the server's endpoint event.
    pub async fn connect(
        server: &str,
        http: reqwest::Client,
        url: &str,
        timeout: Duration,
    ) -> Result<Self, SseTransportError> {
        let base = Url::parse(url).map_err(|e| SseTransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = tokio::time::timeout(
            timeout,
            http.get(base.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| SseTransportError::EndpointTimeout(timeout))??;

        if !response.status().is_success() {
            return Err(SseTransportError::Status {
                status: response.status(),
                url: url.to_string(),
            });
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (event_tx, incoming) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let reader = EventReader {
            server: server.to_string(),
            base,
            endpoint_tx: Some(endpoint_tx),
            event_tx,
        };
        let handle = tokio::spawn(reader.run(response, cancel.clone()));
        supervise(server.to_string(), "sse-reader", handle);

        let endpoint = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(e))) => {
                cancel.cancel();
                return Err(e);
            }
            Ok(Err(_)) => {
                cancel.cancel();
                return Err(SseTransportError::NoEndpoint);
            }
            Err(_) => {
                cancel.cancel();
                return Err(SseTransportError::EndpointTimeout(timeout));
            }
        };

        info!(server = %server, endpoint = %endpoint, "SSE stream open");

        Ok(Self {
            server: server.to_string(),
            http,
            endpoint,
            incoming,
            cancel,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Drop for SseClientTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Transport<RoleClient> for SseClientTransport {
    type Error = SseTransportError;

    fn send(
        &mut self,
        item: ClientJsonRpcMessage,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let response = http.post(endpoint.clone()).json(&item).send().await?;
            if !response.status().is_success() {
                return Err(SseTransportError::Status {
                    status: response.status(),
                    url: endpoint.to_string(),
                });
            }
            Ok(())
        }
    }

    fn receive(&mut self) -> impl Future<Output = Option<ServerJsonRpcMessage>> + Send {
        self.incoming.recv()
    }

    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        debug!(server = %self.server, "Closing SSE stream");
        self.cancel.cancel();
        self.incoming.close();
        std::future::ready(Ok(()))
    }
}

/// Background reader: turns the byte stream into endpoint and message events.
struct EventReader {
    server: String,
    base: Url,
    endpoint_tx: Option<oneshot::Sender<Result<Url, SseTransportError>>>,
    event_tx: mpsc::Sender<ServerJsonRpcMessage>,
}

impl EventReader {
    async fn run(mut self, response: reqwest::Response, cancel: CancellationToken) {
        let mut stream = response.bytes_stream();
        let mut parser = SseEventParser::default();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.feed(&bytes) {
                        if !self.dispatch(event).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(server = %self.server, error = %e, "SSE stream error");
                    break;
                }
                None => break,
            }
        }

        debug!(server = %self.server, "SSE reader stopped");
    }

    /// Returns false once nobody is listening any more.
    async fn dispatch(&mut self, event: SseEvent) -> bool {
        match event.event.as_str() {
            "endpoint" => {
                let Some(tx) = self.endpoint_tx.take() else {
                    debug!(server = %self.server, "Ignoring repeated endpoint event");
                    return true;
                };
                let endpoint =
                    self.base
                        .join(event.data.trim())
                        .map_err(|e| SseTransportError::InvalidUrl {
                            url: event.data.clone(),
                            reason: e.to_string(),
                        });
                tx.send(endpoint).is_ok()
            }
            "message" => match serde_json::from_str::<ServerJsonRpcMessage>(&event.data) {
                Ok(message) => self.event_tx.send(message).await.is_ok(),
                Err(e) => {
                    warn!(server = %self.server, error = %e, "Skipping malformed SSE message");
                    true
                }
            },
            other => {
                debug!(server = %self.server, event = other, "Ignoring SSE event");
                true
            }
        }
    }
}
