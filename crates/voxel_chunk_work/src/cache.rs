//! Budgeted, version-aware artifact cache.
//!
//! Entries are keyed by `(ChunkKey, Version, ProcessorId)` and only served
//! while their version is still the live one; stale entries are dropped on
//! read. One byte budget covers the whole cache: when the total goes over
//! it, the least recently accessed entries are evicted, whichever shard
//! holds them. A miss never affects correctness, only cost.
//!
//! ```text
//!  insert ──► shard[chunk].put ──► total > budget? ──no──► done
//!                                       │yes
//!                                       ▼
//!              peek_lru of every shard ──► oldest access tick ──► pop_lru
//! ```
//!
//! Shards are chosen by chunk, so all versions and processors of one chunk
//! share a shard and can be purged together.

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;

use crate::key::{ArtifactKey, ChunkKey, ChunkVersion};
use crate::metrics::ChunkWorkMetrics;
use crate::sharded::Shards;

type ErasedArtifact = Arc<dyn Any + Send + Sync>;

/// One cached artifact.
pub struct CacheEntry {
	artifact: ErasedArtifact,
	bytes: usize,
	/// Cache-wide access tick; lower is older.
	last_access: u64,
}

impl CacheEntry {
	pub fn bytes(&self) -> usize {
		self.bytes
	}

	pub fn last_access(&self) -> u64 {
		self.last_access
	}
}

struct CacheShard {
	lru: LruCache<ArtifactKey, CacheEntry>,
}

/// Cache size at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub entries: usize,
	pub bytes: usize,
}

pub struct ArtifactCache {
	shards: Shards<CacheShard>,
	budget_bytes: usize,
	clock: AtomicU64,
	entries: AtomicUsize,
	bytes: AtomicUsize,
	metrics: Arc<ChunkWorkMetrics>,
}

impl ArtifactCache {
	/// Cache holding at most `budget_bytes` in total. A zero budget disables
	/// caching.
	pub fn new(budget_bytes: usize, shard_count: usize, metrics: Arc<ChunkWorkMetrics>) -> Self {
		Self {
			shards: Shards::new(shard_count, || CacheShard {
				lru: LruCache::unbounded(),
			}),
			budget_bytes,
			clock: AtomicU64::new(0),
			entries: AtomicUsize::new(0),
			bytes: AtomicUsize::new(0),
			metrics,
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.budget_bytes > 0
	}

	pub fn budget_bytes(&self) -> usize {
		self.budget_bytes
	}

	#[inline]
	fn tick(&self) -> u64 {
		self.clock.fetch_add(1, Ordering::Relaxed)
	}

	/// Look up `key`, serving it only while `live_version` still matches.
	pub fn get<A: Send + Sync + 'static>(&self, key: &ArtifactKey, live_version: ChunkVersion) -> Option<Arc<A>> {
		if !self.is_enabled() {
			return None;
		}

		let mut shard = self.shards.lock(&key.key);
		if key.version != live_version {
			if let Some(entry) = shard.lru.pop(key) {
				self.on_removed(entry.bytes);
			}
			return None;
		}

		let entry = shard.lru.get_mut(key)?;
		entry.last_access = self.tick();
		Arc::clone(&entry.artifact).downcast::<A>().ok()
	}

	/// Insert an artifact that just passed the publish guard.
	///
	/// Artifacts larger than the whole budget are not cached.
	pub fn insert<A: Send + Sync + 'static>(&self, key: ArtifactKey, artifact: Arc<A>, bytes: usize) {
		if !self.is_enabled() || bytes > self.budget_bytes {
			return;
		}

		{
			let mut shard = self.shards.lock(&key.key);
			let entry = CacheEntry {
				artifact,
				bytes,
				last_access: self.tick(),
			};
			if let Some(previous) = shard.lru.put(key, entry) {
				self.on_removed(previous.bytes);
			}
			self.entries.fetch_add(1, Ordering::Relaxed);
			self.bytes.fetch_add(bytes, Ordering::Relaxed);
		}

		self.enforce_budget();
	}

	/// Evict the oldest entries cache-wide until the total fits the budget.
	/// Takes one shard lock at a time.
	fn enforce_budget(&self) {
		while self.bytes.load(Ordering::Relaxed) > self.budget_bytes {
			let Some(index) = self.oldest_shard() else {
				break;
			};
			let mut shard = self.shards.lock_at(index);
			let Some((evicted_key, evicted)) = shard.lru.pop_lru() else {
				continue;
			};
			self.on_removed(evicted.bytes);
			self.metrics.record_cache_eviction();
			tracing::trace!(
				key = %evicted_key.key,
				version = evicted_key.version,
				processor = %evicted_key.processor,
				bytes = evicted.bytes,
				"evicted artifact over budget"
			);
		}
	}

	/// Shard whose least recently used entry is the oldest in the cache.
	fn oldest_shard(&self) -> Option<usize> {
		(0..self.shards.len())
			.filter_map(|index| {
				let shard = self.shards.lock_at(index);
				shard.lru.peek_lru().map(|(_, entry)| (entry.last_access, index))
			})
			.min()
			.map(|(_, index)| index)
	}

	/// Drop every entry for `chunk` whose version is not `live_version`.
	/// Returns the number of entries removed.
	pub fn evict_stale(&self, chunk: ChunkKey, live_version: ChunkVersion) -> usize {
		let mut shard = self.shards.lock(&chunk);
		let stale: Vec<ArtifactKey> = shard
			.lru
			.iter()
			.filter(|(key, _)| key.key == chunk && key.version != live_version)
			.map(|(key, _)| key.clone())
			.collect();

		for key in &stale {
			if let Some(entry) = shard.lru.pop(key) {
				self.on_removed(entry.bytes);
			}
		}
		stale.len()
	}

	/// True when `key` is currently stored (regardless of staleness).
	pub fn contains(&self, key: &ArtifactKey) -> bool {
		self.shards.lock(&key.key).lru.contains(key)
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			entries: self.entries.load(Ordering::Relaxed),
			bytes: self.bytes.load(Ordering::Relaxed),
		}
	}

	fn on_removed(&self, bytes: usize) {
		self.entries.fetch_sub(1, Ordering::Relaxed);
		self.bytes.fetch_sub(bytes, Ordering::Relaxed);
	}
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
