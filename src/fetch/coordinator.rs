//! Deduplicating download coordinator.
//!
//! The coordinator bridges the cache and the per-key download tasks:
//! `fetch` answers from the cache when it can, attaches to the existing
//! in-flight task for the key when one exists, and otherwise creates and
//! starts exactly one new task. At most one task exists per key at any
//! time; concurrent `fetch` calls for the same key share one transport
//! request.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, instrument, warn};

use super::error::FetchError;
use super::task::DownloadTask;
use super::transport::{HttpTransport, Transport};
use crate::asset::{ShieldAsset, ShieldKey};
use crate::cache::ShieldCache;

/// Deduplicating fetch coordinator for shield image assets.
///
/// Both collaborators are injected: the cache decides storage policy, the
/// transport decides how bytes arrive. The coordinator owns only the
/// in-flight registry. Cheap to share behind an `Arc`.
///
/// # Completion contract
///
/// Callbacks fire exactly once, asynchronously, after the initiating call
/// has returned. Failures are never cached, so a caller that receives an
/// error may simply call [`fetch`](Self::fetch) again with the same key to
/// retry from scratch.
pub struct ShieldDownloadCoordinator {
    cache: Arc<dyn ShieldCache>,
    transport: Arc<dyn Transport>,
    tasks: Arc<DashMap<ShieldKey, Arc<DownloadTask>>>,
}

impl ShieldDownloadCoordinator {
    /// Creates a coordinator with explicit cache and transport.
    #[must_use]
    pub fn new(cache: Arc<dyn ShieldCache>, transport: Arc<dyn Transport>) -> Self {
        Self {
            cache,
            transport,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Creates a coordinator using the default [`HttpTransport`].
    #[must_use]
    pub fn with_http_transport(cache: Arc<dyn ShieldCache>) -> Self {
        Self::new(cache, Arc::new(HttpTransport::new()))
    }

    /// Requests the asset for `key`, fetching it from `url` on a miss.
    ///
    /// Exactly one of the following happens:
    /// - cache hit: `callback` is dispatched asynchronously with the
    ///   cached asset and no request is issued;
    /// - a download for `key` is already in flight: `callback` joins its
    ///   subscriber list;
    /// - otherwise a new download task is created, registered, and
    ///   started with `callback` as its first subscriber.
    ///
    /// The registry lookup-or-insert is atomic per key, so concurrent
    /// calls for the same key cannot create two tasks, and attaching to a
    /// task that races to its terminal state is safe: the callback is
    /// then dispatched immediately with the stored outcome.
    #[instrument(level = "debug", skip(self, callback), fields(key = %key))]
    pub fn fetch(
        &self,
        key: &ShieldKey,
        url: &str,
        callback: impl FnOnce(Result<ShieldAsset, FetchError>) + Send + 'static,
    ) {
        if let Some(asset) = self.cache.get(key) {
            debug!("cache hit");
            tokio::spawn(async move { callback(Ok(asset)) });
            return;
        }

        match self.tasks.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("attaching to in-flight download");
                entry.get().add_completion(callback);
            }
            Entry::Vacant(entry) => {
                // A task may have completed and filled the cache between
                // the miss above and taking this entry's lock; re-check
                // before issuing a fresh request.
                if let Some(asset) = self.cache.get(key) {
                    debug!("cache filled while registering");
                    tokio::spawn(async move { callback(Ok(asset)) });
                    return;
                }

                debug!("creating download task");
                let task = DownloadTask::new(key.clone(), url);
                task.set_terminal_hook(self.terminal_hook(key.clone()));
                task.add_completion(callback);
                entry.insert(Arc::clone(&task));

                // The entry guard is released by now; the hook can remove
                // the key without contending with this call.
                if let Err(error) = task.start(Arc::clone(&self.transport)) {
                    // unreachable: the task was created above and nothing
                    // else starts registry tasks
                    warn!(%error, "failed to start download task");
                }
            }
        }
    }

    /// Cancels the in-flight download for `key`, if any.
    ///
    /// Subscribers of the cancelled task receive
    /// [`FetchError::Cancelled`]; nothing is cached, so a subsequent
    /// [`fetch`](Self::fetch) for the key issues a fresh request.
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub fn cancel(&self, key: &ShieldKey) {
        // Clone the task out first: cancel runs the terminal hook, which
        // removes this key, and that must not contend with a held ref.
        let task = self.tasks.get(key).map(|entry| Arc::clone(entry.value()));
        if let Some(task) = task {
            task.cancel();
        }
    }

    /// Cancels every in-flight download.
    pub fn cancel_all(&self) {
        let tasks: Vec<Arc<DownloadTask>> = self
            .tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for task in tasks {
            task.cancel();
        }
    }

    /// Returns the number of downloads currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Builds the bookkeeping hook run inside a task's terminal
    /// transition: cache the asset on success (before the registry
    /// removal, so post-removal fetches hit the cache), then drop the
    /// task from the registry. Failed and cancelled outcomes are never
    /// cached.
    fn terminal_hook(
        &self,
        key: ShieldKey,
    ) -> impl FnOnce(&Result<ShieldAsset, FetchError>) + Send + 'static {
        let cache = Arc::clone(&self.cache);
        let tasks = Arc::clone(&self.tasks);
        move |outcome| {
            if let Ok(asset) = outcome {
                cache.put(key.clone(), asset.clone());
            }
            tasks.remove(&key);
        }
    }
}
