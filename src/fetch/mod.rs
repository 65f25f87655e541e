//! Fetch coordination: transport adapter, download tasks, deduplication.
//!
//! This module is the core of the crate. A [`ShieldDownloadCoordinator`]
//! answers `fetch(key, url, callback)` requests by consulting the cache
//! first and otherwise attaching the caller to the single in-flight
//! [`DownloadTask`] for that key, creating one if none exists. Each task
//! is a small state machine driven by [`TransportEvent`]s and fires every
//! registered completion callback exactly once when it reaches a terminal
//! state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shieldcache::{InMemoryShieldCache, ShieldDownloadCoordinator, ShieldKey};
//!
//! # async fn example() {
//! let cache = Arc::new(InMemoryShieldCache::new());
//! let coordinator = ShieldDownloadCoordinator::with_http_transport(cache);
//!
//! let key = ShieldKey::for_shield("https://shields.example.com", "us-101", "white");
//! coordinator.fetch(&key, "https://shields.example.com/us-101-white.png", |outcome| {
//!     match outcome {
//!         Ok(asset) => println!("shield ready: {} bytes", asset.byte_len()),
//!         Err(error) => eprintln!("shield fetch failed: {error}"),
//!     }
//! });
//! # }
//! ```

mod coordinator;
mod error;
mod task;
mod transport;

pub use coordinator::ShieldDownloadCoordinator;
pub use error::FetchError;
pub use task::{DownloadTask, TaskPhase};
pub use transport::{
    CONNECT_TIMEOUT_SECS, HttpTransport, READ_TIMEOUT_SECS, Transport, TransportEvent,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, FetchError>` explicitly in function signatures.
