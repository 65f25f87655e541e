//! Error types for the fetch module.
//!
//! One terminal outcome per download task fans out to every registered
//! subscriber, so every variant here is `Clone`. None of these errors is
//! fatal to the process and none is retried at this layer; failures are
//! not cached, so the next `fetch` for the same key re-attempts from
//! scratch.

use thiserror::Error;

/// Errors surfaced to fetch completion callbacks.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The server answered with an error status (HTTP >= 400).
    ///
    /// The response body, if any, is discarded.
    #[error("HTTP {status} fetching {url}")]
    ServerError {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Transport-level failure: DNS, connect, TLS, timeout, or a broken
    /// body stream.
    #[error("network error fetching {url}: {message}")]
    ClientError {
        /// The URL that failed to download.
        url: String,
        /// Description of the underlying transport failure.
        message: String,
    },

    /// The server answered 2xx but the body was empty or not a
    /// recognizable image.
    #[error("no image data in response from {url}")]
    NoImageData {
        /// The URL whose body could not be decoded.
        url: String,
    },

    /// The download was cancelled before reaching completion.
    #[error("fetch of {url} was cancelled")]
    Cancelled {
        /// The URL whose download was cancelled.
        url: String,
    },

    /// Programmer error: `start()` was invoked on a task that already
    /// left the idle state.
    #[error("download task for {key} was already started")]
    AlreadyStarted {
        /// The key of the task that was started twice.
        key: String,
    },
}

impl FetchError {
    /// Creates a server error for an HTTP error status.
    pub fn server_error(url: impl Into<String>, status: u16) -> Self {
        Self::ServerError {
            url: url.into(),
            status,
        }
    }

    /// Creates a transport-level client error.
    pub fn client_error(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClientError {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an empty/undecodable-body error.
    pub fn no_image_data(url: impl Into<String>) -> Self {
        Self::NoImageData { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a double-start programmer error.
    pub fn already_started(key: impl Into<String>) -> Self {
        Self::AlreadyStarted { key: key.into() }
    }
}

// Note on source errors:
// We intentionally do NOT hold `reqwest::Error` (or implement
// `From<reqwest::Error>`) in these variants. A task's terminal outcome is
// cloned to every subscriber registered on it, and `reqwest::Error` is not
// `Clone`, so the transport failure is captured as a rendered message at
// the point where context (the URL) is still available.
