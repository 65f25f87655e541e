//! Transport capability: one HTTP request as a stream of events.
//!
//! The download task consumes the network through the [`Transport`] trait
//! so its state machine can be exercised in tests without sockets. The
//! production implementation, [`HttpTransport`], wraps a shared reqwest
//! client and streams each response body chunk by chunk.
//!
//! Event ordering per request: at most one [`TransportEvent::ResponseStarted`],
//! then zero or more [`TransportEvent::DataReceived`], then exactly one
//! [`TransportEvent::Completed`] (failures before the response headers
//! arrive skip straight to `Completed` with an error). Cancellation is
//! best-effort: dropping the event receiver stops the producer at its next
//! send, which does not guarantee the underlying request stops immediately.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, instrument};
use url::Url;

/// Default connect timeout. Shield images are tiny; fail fast.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout for the whole request.
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Buffered events per in-flight request before the producer awaits the
/// consumer.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Events emitted by a transport for a single issued request.
#[derive(Debug)]
pub enum TransportEvent {
    /// Response headers arrived with the given HTTP status code.
    ResponseStarted {
        /// The HTTP status code of the response.
        status: u16,
    },

    /// One chunk of the response body, delivered in transport order.
    DataReceived(Bytes),

    /// The request finished. `error` is `None` when the body was
    /// delivered completely and `Some` for any transport-level failure.
    Completed {
        /// Rendered description of the transport failure, if any.
        error: Option<String>,
    },
}

/// Capability to issue one HTTP request and observe it as events.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a single GET request for `url`.
    ///
    /// Returns the receiving end of the request's event stream. Dropping
    /// the receiver aborts the request (best-effort).
    async fn issue(&self, url: &str) -> mpsc::Receiver<TransportEvent>;
}

/// Reqwest-backed transport shared by all download tasks.
///
/// Designed to be created once and reused, taking advantage of connection
/// pooling across shield fetches to the same sprite host.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Creates a transport with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a transport with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self))]
    async fn issue(&self, url: &str) -> mpsc::Receiver<TransportEvent> {
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Reject malformed URLs without spawning a request
        if Url::parse(url).is_err() {
            let _ = events
                .send(TransportEvent::Completed {
                    error: Some(format!("invalid URL: {url}")),
                })
                .await;
            return receiver;
        }

        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(run_request(client, url, events));
        receiver
    }
}

/// Drives one request to completion, translating it into events.
///
/// Every send ignores a closed channel: a dropped receiver means the task
/// was cancelled, and the remaining body is simply not read.
async fn run_request(client: Client, url: String, events: mpsc::Sender<TransportEvent>) {
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(error) => {
            let message = if error.is_timeout() {
                format!("timeout fetching {url}")
            } else {
                error.to_string()
            };
            let _ = events
                .send(TransportEvent::Completed {
                    error: Some(message),
                })
                .await;
            return;
        }
    };

    let status = response.status().as_u16();
    if events
        .send(TransportEvent::ResponseStarted { status })
        .await
        .is_err()
    {
        debug!(url = %url, "event receiver dropped before response, aborting");
        return;
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk_result) = stream.next().await {
        match chunk_result {
            Ok(chunk) => {
                if events.send(TransportEvent::DataReceived(chunk)).await.is_err() {
                    debug!(url = %url, "event receiver dropped mid-body, aborting");
                    return;
                }
            }
            Err(error) => {
                let _ = events
                    .send(TransportEvent::Completed {
                        error: Some(error.to_string()),
                    })
                    .await;
                return;
            }
        }
    }

    let _ = events.send(TransportEvent::Completed { error: None }).await;
}
