//! Shieldcache Core Library
//!
//! This library provides the fetch/cache coordination layer for keyed
//! road-shield image assets: it fetches small binary images from remote
//! URLs, caches them by key, and serves many concurrent requesters for
//! the same key without issuing duplicate network fetches.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`asset`] - Shield keys and immutable image payloads
//! - [`cache`] - The key→asset storage capability and an in-memory default
//! - [`fetch`] - Transport adapter, per-key download task state machine,
//!   and the deduplicating download coordinator
//!
//! The coordinator is the public entry point: callers ask for an asset by
//! key and either get the cached copy or are attached to the single
//! in-flight download for that key. Results arrive via one-shot callbacks
//! dispatched off the caller's stack.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod asset;
pub mod cache;
pub mod fetch;

// Re-export commonly used types
pub use asset::{ImageFormat, ShieldAsset, ShieldKey};
pub use cache::{InMemoryShieldCache, ShieldCache};
pub use fetch::{
    DownloadTask, FetchError, HttpTransport, ShieldDownloadCoordinator, TaskPhase, Transport,
    TransportEvent,
};
