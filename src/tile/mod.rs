//! Content-addressed, refcounted decoded-tile cache.
//!
//! Keyed by `(level, col, row, plane)` rather than the teacher's
//! `(slide_id, level, x, y, quality)`, since this crate caches one
//! [`crate::slide::Slide`]'s tiles at a time rather than a multi-slide JPEG
//! re-encode cache — but the shape is the same: an `lru::LruCache` guarded
//! by a lock, evicted by running byte total against a soft budget. Two
//! things the teacher's `tile::cache::TileCache` doesn't need that this one
//! does: a refcount per entry (pinned tiles are never evicted) and
//! single-flight decode (concurrent misses for the same key share one
//! decode rather than racing).

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::TileError;
use crate::format::codecs::DecodedTile;

/// Cache key: a decoded tile's coordinate within one slide's pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub level: u32,
    pub col: u32,
    pub row: u32,
    pub plane: u32,
}

struct CacheEntry {
    tile: Arc<DecodedTile>,
    refcount: Arc<AtomicUsize>,
}

impl CacheEntry {
    fn byte_len(&self) -> usize {
        self.tile.rgba.len()
    }
}

/// A caller-held, refcounted handle to a decoded tile.
///
/// Dereferences to [`DecodedTile`]. Decrements the entry's refcount exactly
/// once, on drop; the entry becomes eligible for eviction only once every
/// outstanding `PinnedTile` referencing it has been dropped.
pub struct PinnedTile {
    tile: Arc<DecodedTile>,
    refcount: Arc<AtomicUsize>,
}

impl Deref for PinnedTile {
    type Target = DecodedTile;
    fn deref(&self) -> &DecodedTile {
        &self.tile
    }
}

impl Drop for PinnedTile {
    fn drop(&mut self) {
        self.refcount.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The outcome of a single-flight decode: either the decoded tile, shared
/// with every other waiter on the same key, or the error the leader's
/// decode produced (also shared, not re-attempted).
type DecodeSlot = Arc<Mutex<Option<Result<Arc<DecodedTile>, TileError>>>>;

/// The decoded-tile cache: approximate LRU under a soft byte budget, never
/// evicting a pinned (refcount > 0) entry, with true single-flight decode
/// per key.
pub struct TileCache {
    entries: Mutex<LruCache<TileKey, CacheEntry>>,
    budget_bytes: usize,
    current_bytes: Mutex<usize>,
    in_flight: Mutex<HashMap<TileKey, DecodeSlot>>,
}

impl TileCache {
    /// Create a cache with the given soft byte budget.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            budget_bytes,
            current_bytes: Mutex::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Look up `key`, decoding via `decode` on a miss.
    ///
    /// `decode` is only invoked by the single leader for `key`; every other
    /// concurrent caller observes the leader's result (success or error)
    /// without decoding independently.
    pub async fn get_or_decode<F, Fut>(&self, key: TileKey, decode: F) -> Result<PinnedTile, TileError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<DecodedTile, TileError>>,
    {
        if let Some(pinned) = self.try_pin(key).await {
            return Ok(pinned);
        }

        let slot = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };

        let mut guard = slot.lock().await;

        // Another leader may have already inserted into the cache and
        // cleared `in_flight` between our `try_pin` miss and acquiring the
        // slot lock; check again before assuming leadership.
        if let Some(pinned) = self.try_pin(key).await {
            return Ok(pinned);
        }

        if guard.is_none() {
            let result = decode().await.map(Arc::new);
            *guard = Some(result.clone());
            let leader_pinned = match result {
                Ok(tile) => Some(self.insert(key, tile).await),
                Err(_) => None,
            };
            self.in_flight.lock().await.remove(&key);

            if let Some(pinned) = leader_pinned {
                return Ok(pinned);
            }
        }

        if let Err(e) = guard.as_ref().expect("decode slot populated by leader") {
            return Err(e.clone());
        }

        // The leader above already returned its own pinned handle directly,
        // so anything reaching this point is a waiter: the leader's insert
        // has completed and released `guard` before any of its own decoded
        // bytes could be touched again, so a plain pin suffices here.
        Ok(self
            .try_pin(key)
            .await
            .expect("entry inserted by leader before slot is released"))
    }

    async fn try_pin(&self, key: TileKey) -> Option<PinnedTile> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(&key)?;
        entry.refcount.fetch_add(1, Ordering::AcqRel);
        Some(PinnedTile {
            tile: entry.tile.clone(),
            refcount: entry.refcount.clone(),
        })
    }

    /// Insert a freshly decoded tile already pinned at refcount 1, and
    /// return that pin to the caller. The entry must exist at refcount 1
    /// from the moment it becomes visible in the map: `evict_unpinned` below
    /// runs on every insert that pushes the cache over budget, and a
    /// refcount-0 entry sitting alone as the only unpinned candidate would
    /// be evicted before the leader ever got a handle to it. Returning the
    /// `PinnedTile` here (its `Drop` decrements the refcount) keeps "pinned
    /// the instant it's visible" true without a separate pin step that could
    /// race eviction.
    async fn insert(&self, key: TileKey, tile: Arc<DecodedTile>) -> PinnedTile {
        let byte_len = tile.rgba.len();
        let refcount = Arc::new(AtomicUsize::new(1));

        {
            let mut entries = self.entries.lock().await;
            entries.put(
                key,
                CacheEntry {
                    tile: tile.clone(),
                    refcount: refcount.clone(),
                },
            );
        }

        let mut current = self.current_bytes.lock().await;
        *current += byte_len;

        if *current > self.budget_bytes {
            self.evict_unpinned(&mut current).await;
        }
        drop(current);

        PinnedTile { tile, refcount }
    }

    /// Evict approximately-LRU unpinned entries until within budget. Admits
    /// over budget (soft budget) if nothing unpinned remains.
    async fn evict_unpinned(&self, current: &mut usize) {
        let mut entries = self.entries.lock().await;

        let candidates: Vec<TileKey> = entries
            .iter()
            .rev() // least-recently-used first
            .map(|(k, _)| *k)
            .collect();

        for key in candidates {
            if *current <= self.budget_bytes {
                break;
            }
            let Some(entry) = entries.peek(&key) else { continue };
            if entry.refcount.load(Ordering::Acquire) > 0 {
                continue;
            }
            let byte_len = entry.byte_len();
            entries.pop(&key);
            *current = current.saturating_sub(byte_len);
        }
    }

    /// Current number of cached entries (pinned or not). Test/diagnostic use.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Current tracked byte total.
    pub async fn current_bytes(&self) -> usize {
        *self.current_bytes.lock().await
    }
}
