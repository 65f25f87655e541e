//! Key→asset storage capability.
//!
//! The coordinator consumes the cache through the [`ShieldCache`] trait so
//! applications decide ownership and lifetime at their composition root
//! (and tests substitute fakes). Eviction and persistence are out of scope
//! for this layer; [`InMemoryShieldCache`] is the process-local default.

use dashmap::DashMap;
use tracing::debug;

use crate::asset::{ShieldAsset, ShieldKey};

/// Storage capability consumed by the download coordinator.
///
/// Implementations must be safe to call from concurrent Tokio tasks. No
/// eviction or expiry contract is specified here: `get` after `put` for
/// the same key may legitimately miss if the implementation evicted the
/// entry, and the coordinator will simply fetch again.
pub trait ShieldCache: Send + Sync {
    /// Looks up the asset stored under `key`.
    fn get(&self, key: &ShieldKey) -> Option<ShieldAsset>;

    /// Stores `asset` under `key`, replacing any previous entry.
    fn put(&self, key: ShieldKey, asset: ShieldAsset);
}

/// Concurrent in-memory cache keyed by [`ShieldKey`].
///
/// Designed to be wrapped in `Arc` and shared between the coordinator and
/// any other consumers. Assets are stored by value; they are cheap to
/// clone out because the payload is reference-counted.
#[derive(Debug, Default)]
pub struct InMemoryShieldCache {
    assets: DashMap<ShieldKey, ShieldAsset>,
}

impl InMemoryShieldCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl ShieldCache for InMemoryShieldCache {
    fn get(&self, key: &ShieldKey) -> Option<ShieldAsset> {
        let asset = self.assets.get(key).map(|entry| entry.value().clone());
        debug!(key = %key, hit = asset.is_some(), "cache lookup");
        asset
    }

    fn put(&self, key: ShieldKey, asset: ShieldAsset) {
        debug!(key = %key, bytes = asset.byte_len(), "caching asset");
        self.assets.insert(key, asset);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn png_asset() -> ShieldAsset {
        ShieldAsset::decode(
            "https://example.com/shield.png",
            Bytes::from_static(b"\x89PNG\r\n\x1a\npixels"),
        )
        .unwrap()
    }

    #[test]
    fn test_get_on_empty_cache_misses() {
        let cache = InMemoryShieldCache::new();
        assert!(cache.get(&ShieldKey::new("shield-A")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_then_get_round_trips() {
        let cache = InMemoryShieldCache::new();
        let key = ShieldKey::new("shield-A");
        let asset = png_asset();

        cache.put(key.clone(), asset.clone());

        let stored = cache.get(&key).unwrap();
        assert_eq!(stored.data(), asset.data());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_replaces_existing_entry() {
        let cache = InMemoryShieldCache::new();
        let key = ShieldKey::new("shield-A");

        cache.put(key.clone(), png_asset());
        let replacement = ShieldAsset::decode(
            "https://example.com/other.gif",
            Bytes::from_static(b"GIF89anew"),
        )
        .unwrap();
        cache.put(key.clone(), replacement.clone());

        let stored = cache.get(&key).unwrap();
        assert_eq!(stored.data(), replacement.data());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let cache = InMemoryShieldCache::new();
        cache.put(ShieldKey::new("shield-A"), png_asset());

        assert!(cache.get(&ShieldKey::new("shield-B")).is_none());
    }
}
