//! Reference-counted snapshot sharing.
//!
//! Repeated requests for the same `(ChunkKey, Version)` resolve to one copy:
//!
//! ```text
//! acquire(k, v) ──► shard lock ──► entry exists? ──yes──► refcount += 1
//!                                      │no
//!                                      ▼
//!                               insert, refcount = 1
//!                                      │
//!              (outside the shard lock, once per key)
//!                                      ▼
//!                       source.try_create_snapshot(k, v)
//!
//! drop(lease) ──► refcount -= 1 ──► 0? ──► remove entry, buffer back to pool
//! ```
//!
//! Concurrent first callers wait on the same `OnceLock`, so the Snapshot
//! Source runs at most once per key and every waiter sees the same outcome,
//! success or failure.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use super::{ChunkSnapshot, SnapshotPool};
use crate::error::panic_message;
use crate::key::SnapshotKey;
use crate::metrics::{ChunkWorkMetrics, Timing};
use crate::sharded::Shards;
use crate::source::ChunkSnapshotSource;

/// Result of creating a snapshot, shared by every lease on the key.
#[derive(Clone, Debug)]
pub enum LeaseOutcome {
	Ready(Arc<ChunkSnapshot>),
	/// The source reported the chunk as not available.
	Unavailable,
	/// The source panicked; carries the panic message.
	Failed(String),
}

#[derive(Default)]
struct LeaseSlot {
	outcome: OnceLock<LeaseOutcome>,
}

struct LeaseEntry {
	slot: Arc<LeaseSlot>,
	refcount: usize,
}

/// Deduplicating, reference-counting snapshot registry.
pub struct SnapshotRegistry {
	source: Arc<dyn ChunkSnapshotSource>,
	pool: SnapshotPool,
	entries: Shards<FxHashMap<SnapshotKey, LeaseEntry>>,
	metrics: Arc<ChunkWorkMetrics>,
}

impl SnapshotRegistry {
	pub fn new(
		source: Arc<dyn ChunkSnapshotSource>,
		pool: SnapshotPool,
		shard_count: usize,
		metrics: Arc<ChunkWorkMetrics>,
	) -> Self {
		Self {
			source,
			pool,
			entries: Shards::new(shard_count, FxHashMap::default),
			metrics,
		}
	}

	/// Acquire a lease, creating the snapshot if this is the first holder.
	///
	/// May block while another thread is creating the same snapshot.
	pub fn acquire(&self, key: SnapshotKey) -> SnapshotLease<'_> {
		let slot = {
			let mut shard = self.entries.lock(&key.key);
			let entry = shard.entry(key).or_insert_with(|| LeaseEntry {
				slot: Arc::new(LeaseSlot::default()),
				refcount: 0,
			});
			entry.refcount += 1;
			Arc::clone(&entry.slot)
		};

		let outcome = slot.outcome.get_or_init(|| self.create(key)).clone();
		SnapshotLease {
			registry: self,
			key,
			outcome,
		}
	}

	fn create(&self, key: SnapshotKey) -> LeaseOutcome {
		let _span = tracing::trace_span!("snapshot_acquire", key = %key.key, version = key.version).entered();
		let _timer = self.metrics.time(Timing::Snapshot);

		let created = panic::catch_unwind(AssertUnwindSafe(|| {
			self.source.try_create_snapshot(key.key, key.version, &self.pool)
		}));

		match created {
			Ok(Some(snapshot)) => {
				self.metrics.record_snapshot_created();
				LeaseOutcome::Ready(Arc::new(snapshot))
			}
			Ok(None) => {
				tracing::debug!(key = %key.key, version = key.version, "chunk not available for snapshot");
				LeaseOutcome::Unavailable
			}
			Err(payload) => {
				let reason = panic_message(payload.as_ref());
				tracing::warn!(key = %key.key, version = key.version, %reason, "snapshot source panicked");
				LeaseOutcome::Failed(reason)
			}
		}
	}

	fn release(&self, key: SnapshotKey) {
		let removed = {
			let mut shard = self.entries.lock(&key.key);
			let Some(entry) = shard.get_mut(&key) else {
				debug_assert!(false, "released a lease that was never acquired");
				return;
			};
			entry.refcount -= 1;
			if entry.refcount == 0 {
				shard.remove(&key)
			} else {
				None
			}
		};

		// Drop the last registry reference outside the shard lock.
		if let Some(entry) = removed {
			if let Some(LeaseOutcome::Ready(_)) = entry.slot.outcome.get() {
				self.metrics.record_snapshot_released();
			}
		}
	}

	/// Number of `(ChunkKey, Version)` entries currently leased.
	pub fn live_count(&self) -> usize {
		let mut count = 0;
		self.entries.for_each(|shard| count += shard.len());
		count
	}

	/// Current holder count for `key` (0 when not registered).
	pub fn refcount(&self, key: SnapshotKey) -> usize {
		self.entries
			.lock(&key.key)
			.get(&key)
			.map_or(0, |entry| entry.refcount)
	}

	pub fn pool(&self) -> &SnapshotPool {
		&self.pool
	}
}

/// RAII lease on a shared snapshot. Released on drop.
pub struct SnapshotLease<'a> {
	registry: &'a SnapshotRegistry,
	key: SnapshotKey,
	outcome: LeaseOutcome,
}

impl SnapshotLease<'_> {
	pub fn key(&self) -> SnapshotKey {
		self.key
	}

	pub fn outcome(&self) -> &LeaseOutcome {
		&self.outcome
	}

	/// The snapshot, if creation succeeded.
	pub fn snapshot(&self) -> Option<&ChunkSnapshot> {
		match self.outcome() {
			LeaseOutcome::Ready(snapshot) => Some(snapshot),
			_ => None,
		}
	}
}

impl Drop for SnapshotLease<'_> {
	fn drop(&mut self) {
		self.registry.release(self.key);
	}
}

#[cfg(test)]
#[path = "lease_test.rs"]
mod lease_test;
