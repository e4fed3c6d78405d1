//! ChunkWorkService - the public entry point.
//!
//! Turns `(chunk, version, processor)` requests into artifacts computed on
//! background workers. The owner thread only ever pays for a few hash
//! lookups; snapshots are taken lazily by workers and shared between
//! processors that need the same chunk version.
//!
//! # Request path
//!
//! ```text
//! request(key, v, P)
//!   │
//!   ├─ token cancelled / shutting down ──────────────► Canceled
//!   ├─ cache hit for (key, v, P) at live version ────► Success (from_cache)
//!   ├─ v < live version ─────────────────────────────► Superseded
//!   ├─ same (key, v, P) already queued or running ───► attach to it
//!   ├─ newer version of (key, P) already admitted ───► Superseded
//!   ├─ bounded queue full ───────────────────────────► Rejected
//!   └─ enqueue; older queued (key, P) work ──────────► Superseded
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let service = ChunkWorkService::new(ChunkWorkConfig::default(), versions, source)?;
//! let processor = Arc::new(OccupancyProcessor);
//!
//! let mut handle = service.request(key, version, &processor, ChunkWorkOptions::NORMAL, CancellationToken::new());
//!
//! // later, once per frame
//! if let Some(result) = handle.poll() {
//!     if let Some(occupancy) = result.artifact() { /* ... */ }
//! }
//! ```

use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::ChunkWorkConfig;
use crate::error::{ChunkWorkError, ServiceError};
use crate::key::{ArtifactKey, ChunkKey, ChunkVersion, ProcessorId};
use crate::metrics::MetricsSnapshot;
use crate::processor::ChunkProcessor;
use crate::result::{ChunkWorkOptions, ChunkWorkResult, ChunkWorkStatus, Priority};
use crate::scheduler::job::{ErasedJob, Job};
use crate::scheduler::queue::QueuedJob;
use crate::scheduler::worker::WorkerPool;
use crate::scheduler::{ChunkWorkHandle, LatestRequest, SchedulerState};
use crate::snapshot::PoolStats;
use crate::source::{ChunkSnapshotSource, ChunkVersionProvider};

/// Background processing service for derived chunk artifacts.
///
/// `Send + Sync`; share it behind an `Arc` if several threads submit work.
/// Dropping the service shuts it down.
pub struct ChunkWorkService {
	state: Arc<SchedulerState>,
	workers: WorkerPool,
}

impl ChunkWorkService {
	/// Validate `config`, then start the worker pool.
	pub fn new(
		config: ChunkWorkConfig,
		versions: Arc<dyn ChunkVersionProvider>,
		source: Arc<dyn ChunkSnapshotSource>,
	) -> Result<Self, ServiceError> {
		config.validate()?;
		let state = Arc::new(SchedulerState::new(config, versions, source));
		let workers = WorkerPool::start(&state)?;
		Ok(Self { state, workers })
	}

	// =========================================================================
	// Requests
	// =========================================================================

	/// Ask for the artifact `processor` derives from `key` at `version`.
	///
	/// Never blocks: the returned handle resolves exactly once, either right
	/// away (cache hit, supersede, cancel) or when a worker finishes.
	pub fn request<P: ChunkProcessor>(
		&self,
		key: ChunkKey,
		version: ChunkVersion,
		processor: &Arc<P>,
		options: ChunkWorkOptions,
		cancel: CancellationToken,
	) -> ChunkWorkHandle<P::Artifact> {
		let state = &*self.state;
		state.metrics.record_request();
		let artifact_key = ArtifactKey::new(key, version, processor.id());

		if cancel.is_cancelled() {
			return self.resolved(ChunkWorkResult::terminal(
				ChunkWorkStatus::Canceled,
				&artifact_key,
				"canceled before admission",
			));
		}
		if state.is_shutting_down() {
			return self.resolved(ChunkWorkResult::terminal(
				ChunkWorkStatus::Canceled,
				&artifact_key,
				"service shut down",
			));
		}

		let live = state.versions.current_version(key);
		if state.cache.is_enabled() {
			match state.cache.get::<P::Artifact>(&artifact_key, live) {
				Some(artifact) => {
					state.metrics.record_cache_hit();
					return self.resolved(ChunkWorkResult::cached(&artifact_key, artifact));
				}
				None => state.metrics.record_cache_miss(),
			}
		}

		if version < live {
			return self.resolved(ChunkWorkResult::terminal(
				ChunkWorkStatus::Superseded,
				&artifact_key,
				"older than the live version",
			));
		}

		self.admit(artifact_key, processor, options.band(), cancel)
	}

	/// Dedup, supersede and enqueue.
	fn admit<P: ChunkProcessor>(
		&self,
		key: ArtifactKey,
		processor: &Arc<P>,
		priority: Priority,
		cancel: CancellationToken,
	) -> ChunkWorkHandle<P::Artifact> {
		let state = &*self.state;

		let mut in_flight = state.in_flight.lock(&key.key);
		if let Some(existing) = in_flight.get(&key).cloned() {
			drop(in_flight);
			return match existing.as_any().downcast::<Job<P>>() {
				Ok(job) => {
					state.metrics.record_dedup();
					tracing::trace!(key = %key.key, version = key.version, processor = %key.processor, "attached to in-flight work");
					job.attach(cancel)
				}
				Err(_) => {
					tracing::warn!(processor = %key.processor, "processor id shared by different processor types");
					self.resolved(ChunkWorkResult::failed(
						&key,
						ChunkWorkError::Unknown,
						"processor id already used by another processor type",
					))
				}
			};
		}

		if let Some(max) = state.config.max_queue_depth {
			if state.queue.len() >= max {
				drop(in_flight);
				tracing::debug!(depth = max, "queue full, rejecting request");
				return self.resolved(ChunkWorkResult::terminal(ChunkWorkStatus::Rejected, &key, "queue full"));
			}
		}

		let mut latest = state.latest.lock(&key.key);
		let slot = (key.key, key.processor.clone());
		if let Some(newer) = latest.get(&slot).map(|r| r.version).filter(|&v| v > key.version) {
			drop(latest);
			drop(in_flight);
			tracing::debug!(key = %key.key, version = key.version, newer, "newer version already requested");
			return self.resolved(ChunkWorkResult::terminal(
				ChunkWorkStatus::Superseded,
				&key,
				"a newer version was already requested",
			));
		}

		let job = Job::new(key.clone(), priority, Arc::clone(processor));
		let handle = job.attach(cancel);
		let queued: QueuedJob = job;
		let replaced = latest.insert(
			slot,
			LatestRequest {
				version: key.version,
				job: Arc::clone(&queued),
			},
		);
		in_flight.insert(key, Arc::clone(&queued));
		drop(latest);
		drop(in_flight);

		// Completing the older job takes shard locks of its own.
		if let Some(older) = replaced {
			state.supersede_queued(&older.job, "superseded by a newer version");
		}

		state.queue.push(queued);
		state.metrics.record_enqueue();

		// Lost a race with shutdown: nobody else will drain this entry.
		if state.is_shutting_down() {
			state.drain_queue();
		}
		handle
	}

	fn resolved<A>(&self, result: ChunkWorkResult<A>) -> ChunkWorkHandle<A> {
		self.state.metrics.record_completion(result.status);
		ChunkWorkHandle::ready(result)
	}

	// =========================================================================
	// Owner notifications and probes
	// =========================================================================

	/// Tell the service `key` was mutated and its live version moved on.
	///
	/// Queued work for older versions is superseded, running work for older
	/// versions is asked to stop, and stale cache entries are dropped.
	pub fn notify_version_changed(&self, key: ChunkKey) {
		let state = &*self.state;
		let live = state.versions.current_version(key);

		let superseded = state
			.take_stale_requests(key, live)
			.iter()
			.filter(|job| state.supersede_queued(job, "chunk version changed"))
			.count();
		let cancelled = state.cancel_stale_running(key, live);
		let evicted = state.cache.evict_stale(key, live);

		tracing::debug!(key = %key, live, superseded, cancelled, evicted, "chunk version changed");
	}

	/// Cached artifact for `(key, version, processor)`, if it is still live.
	pub fn cached<A: Send + Sync + 'static>(
		&self,
		key: ChunkKey,
		version: ChunkVersion,
		processor: &ProcessorId,
	) -> Option<Arc<A>> {
		let live = self.state.versions.current_version(key);
		let artifact_key = ArtifactKey::new(key, version, processor.clone());
		self.state.cache.get(&artifact_key, live)
	}

	/// Counters plus current queue and cache gauges.
	pub fn metrics(&self) -> MetricsSnapshot {
		let mut snapshot = self.state.metrics.snapshot();
		let cache = self.state.cache.stats();
		snapshot.queue_depth = self.state.queue.len();
		snapshot.cache_bytes = cache.bytes;
		snapshot.cache_entries = cache.entries;
		snapshot
	}

	pub fn config(&self) -> &ChunkWorkConfig {
		&self.state.config
	}

	/// Jobs waiting in the queue.
	pub fn queue_depth(&self) -> usize {
		self.state.queue.len()
	}

	pub fn worker_count(&self) -> usize {
		self.workers.len()
	}

	/// `(ChunkKey, Version)` snapshots currently leased by workers.
	pub fn live_snapshots(&self) -> usize {
		self.state.registry.live_count()
	}

	/// Snapshot buffer pool counters.
	pub fn pool_stats(&self) -> PoolStats {
		self.state.registry.pool().stats()
	}

	// =========================================================================
	// Shutdown
	// =========================================================================

	pub fn is_shut_down(&self) -> bool {
		self.state.is_shutting_down()
	}

	/// Stop accepting work, cancel everything still queued, let running jobs
	/// finish and stop the workers. Blocks until the workers have exited.
	pub fn shutdown(&self) {
		let state = &*self.state;
		if !state.begin_shutdown() {
			return;
		}
		tracing::info!(workers = self.workers.len(), queued = state.queue.len(), "shutting down chunk work service");

		state.queue.stop(self.workers.len());
		let mut drained = state.drain_queue();
		self.workers.join();
		drained += state.drain_queue();

		tracing::info!(drained, "chunk work service stopped");
	}
}

impl Drop for ChunkWorkService {
	fn drop(&mut self) {
		self.shutdown();
	}
}

#[cfg(test)]
#[path = "service_test.rs"]
mod service_test;
