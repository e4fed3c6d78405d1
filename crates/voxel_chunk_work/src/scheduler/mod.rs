//! Work scheduling: banded queue, job records and the worker pool.
//!
//! ```text
//!   request() ──► in_flight (dedup) ──► latest (supersede) ──► JobQueue
//!                                                                 │
//!                        ┌────────────────────────────────────────┘
//!                        ▼
//!   worker ──► version check ──► lease snapshot ──► process ──► publish guard
//!                                                                 │
//!                                 forget bookkeeping ◄── finish ◄─┘
//! ```
//!
//! All bookkeeping maps are sharded by [`ChunkKey`]. Admission locks an
//! `in_flight` shard and then a `latest` shard; every other path takes at
//! most one shard lock at a time.

pub(crate) mod job;
pub(crate) mod queue;
pub(crate) mod worker;

pub use job::ChunkWorkHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use self::job::{ErasedJob, JobId};
use self::queue::{JobQueue, QueuedJob};
use crate::cache::ArtifactCache;
use crate::cancel::CancellationToken;
use crate::config::ChunkWorkConfig;
use crate::key::{ArtifactKey, ChunkKey, ChunkVersion, ProcessorId};
use crate::metrics::ChunkWorkMetrics;
use crate::result::ChunkWorkStatus;
use crate::sharded::Shards;
use crate::snapshot::{SnapshotPool, SnapshotRegistry};
use crate::source::{ChunkSnapshotSource, ChunkVersionProvider};

/// Newest admitted request for one `(ChunkKey, ProcessorId)` pair.
pub(crate) struct LatestRequest {
	pub version: ChunkVersion,
	pub job: QueuedJob,
}

struct RunningJob {
	job: JobId,
	version: ChunkVersion,
	token: CancellationToken,
}

/// State shared by the service front-end and every worker.
pub(crate) struct SchedulerState {
	pub config: ChunkWorkConfig,
	pub versions: Arc<dyn ChunkVersionProvider>,
	pub registry: SnapshotRegistry,
	pub cache: ArtifactCache,
	pub metrics: Arc<ChunkWorkMetrics>,
	pub queue: JobQueue,
	/// Queued or running work by artifact key.
	pub in_flight: Shards<FxHashMap<ArtifactKey, QueuedJob>>,
	/// Supersede tracking.
	pub latest: Shards<FxHashMap<(ChunkKey, ProcessorId), LatestRequest>>,
	/// Per-chunk cancellation tokens of running jobs.
	running: Shards<FxHashMap<ChunkKey, SmallVec<[RunningJob; 2]>>>,
	shutting_down: AtomicBool,
}

impl SchedulerState {
	pub fn new(
		config: ChunkWorkConfig,
		versions: Arc<dyn ChunkVersionProvider>,
		source: Arc<dyn ChunkSnapshotSource>,
	) -> Self {
		let metrics = Arc::new(ChunkWorkMetrics::new());
		let shards = config.shard_count;
		Self {
			registry: SnapshotRegistry::new(source, SnapshotPool::new(), shards, Arc::clone(&metrics)),
			cache: ArtifactCache::new(config.cache_budget_bytes, shards, Arc::clone(&metrics)),
			queue: JobQueue::new(),
			in_flight: Shards::new(shards, FxHashMap::default),
			latest: Shards::new(shards, FxHashMap::default),
			running: Shards::new(shards, FxHashMap::default),
			shutting_down: AtomicBool::new(false),
			config,
			versions,
			metrics,
		}
	}

	// =========================================================================
	// Lifecycle
	// =========================================================================

	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::Acquire)
	}

	/// Returns false when shutdown had already begun.
	pub fn begin_shutdown(&self) -> bool {
		!self.shutting_down.swap(true, Ordering::AcqRel)
	}

	/// Complete every job still waiting in the queue as `Canceled`.
	pub fn drain_queue(&self) -> usize {
		let mut drained = 0;
		while let Some(job) = self.queue.pop_highest() {
			if job.header().try_claim_queued() {
				job.complete(self, ChunkWorkStatus::Canceled, "service shut down");
				drained += 1;
			}
		}
		drained
	}

	// =========================================================================
	// Supersede bookkeeping
	// =========================================================================

	/// Complete a job that has not started yet as `Superseded`.
	///
	/// Its queue slot stays behind and is skipped when a worker pops it.
	pub fn supersede_queued(&self, job: &QueuedJob, reason: &str) -> bool {
		let header = job.header();
		if !header.try_claim_queued() {
			return false;
		}
		tracing::debug!(
			key = %header.key.key,
			version = header.key.version,
			processor = %header.key.processor,
			reason,
			"superseded queued work"
		);
		job.complete(self, ChunkWorkStatus::Superseded, reason);
		true
	}

	/// Remove supersede tracking for every processor on `chunk` whose newest
	/// request is older than `live`, returning their jobs.
	pub fn take_stale_requests(&self, chunk: ChunkKey, live: ChunkVersion) -> Vec<QueuedJob> {
		let mut latest = self.latest.lock(&chunk);
		let mut stale = Vec::new();
		latest.retain(|(key, _), request| {
			if *key == chunk && request.version < live {
				stale.push(Arc::clone(&request.job));
				false
			} else {
				true
			}
		});
		stale
	}

	/// Drop the bookkeeping that still points at a finished job.
	pub fn forget(&self, header: &job::JobHeader) {
		let key = &header.key;
		{
			let mut in_flight = self.in_flight.lock(&key.key);
			if in_flight.get(key).is_some_and(|job| job.header().id == header.id) {
				in_flight.remove(key);
			}
		}
		{
			let mut latest = self.latest.lock(&key.key);
			let slot = (key.key, key.processor.clone());
			if latest.get(&slot).is_some_and(|request| request.job.header().id == header.id) {
				latest.remove(&slot);
			}
		}
	}

	// =========================================================================
	// Running-job cancellation
	// =========================================================================

	/// Register a running job and hand back its per-chunk token.
	pub fn register_running(&self, chunk: ChunkKey, version: ChunkVersion, job: JobId) -> RunningGuard<'_> {
		let token = CancellationToken::new();
		self.running
			.lock(&chunk)
			.entry(chunk)
			.or_default()
			.push(RunningJob {
				job,
				version,
				token: token.clone(),
			});
		RunningGuard {
			state: self,
			chunk,
			job,
			token,
		}
	}

	/// Trigger the per-chunk token of running jobs older than `live`.
	pub fn cancel_stale_running(&self, chunk: ChunkKey, live: ChunkVersion) -> usize {
		let running = self.running.lock(&chunk);
		let Some(jobs) = running.get(&chunk) else {
			return 0;
		};
		let mut cancelled = 0;
		for entry in jobs.iter().filter(|r| r.version < live) {
			if !entry.token.is_cancelled() {
				entry.token.cancel();
				cancelled += 1;
			}
		}
		cancelled
	}

	fn unregister_running(&self, chunk: ChunkKey, job: JobId) {
		let mut running = self.running.lock(&chunk);
		if let Some(jobs) = running.get_mut(&chunk) {
			jobs.retain(|r| r.job != job);
			if jobs.is_empty() {
				running.remove(&chunk);
			}
		}
	}
}

/// Keeps a running job's per-chunk token registered until dropped.
pub(crate) struct RunningGuard<'a> {
	state: &'a SchedulerState,
	chunk: ChunkKey,
	job: JobId,
	token: CancellationToken,
}

impl RunningGuard<'_> {
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}
}

impl Drop for RunningGuard<'_> {
	fn drop(&mut self) {
		self.state.unregister_running(self.chunk, self.job);
	}
}
