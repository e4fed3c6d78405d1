//! ChunkWorkConfig - worker pool sizing, cache budget and queue policy.

use std::borrow::Cow;

use crate::error::ConfigError;

/// One mebibyte.
const MIB: usize = 1024 * 1024;

/// Configuration for [`ChunkWorkService`](crate::service::ChunkWorkService).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkWorkConfig {
	/// Fixed worker pool size. `None` = `max(1, cpus - 1)`.
	pub worker_count: Option<usize>,

	/// Artifact cache byte budget. 0 disables caching.
	pub cache_budget_bytes: usize,

	/// Size charged for artifacts whose processor reports no estimate.
	pub default_artifact_bytes: usize,

	/// Shard count for the per-key locked maps (in-flight, supersede
	/// tracking, snapshot leases, cache).
	pub shard_count: usize,

	/// Optional admission bound. `None` keeps the queue unbounded; when set,
	/// requests beyond the bound complete immediately as `Rejected`.
	pub max_queue_depth: Option<usize>,

	/// Worker threads are named `{prefix}-{index}`.
	pub thread_name_prefix: Cow<'static, str>,
}

impl ChunkWorkConfig {
	/// Default cache budget.
	pub const DEFAULT_CACHE_BUDGET_BYTES: usize = 64 * MIB;
	/// Default per-artifact size estimate.
	pub const DEFAULT_ARTIFACT_BYTES: usize = 4 * 1024;
	/// Default shard count.
	pub const DEFAULT_SHARD_COUNT: usize = 16;

	pub const DEFAULT: Self = Self {
		worker_count: None,
		cache_budget_bytes: Self::DEFAULT_CACHE_BUDGET_BYTES,
		default_artifact_bytes: Self::DEFAULT_ARTIFACT_BYTES,
		shard_count: Self::DEFAULT_SHARD_COUNT,
		max_queue_depth: None,
		thread_name_prefix: Cow::Borrowed("chunk-work"),
	};

	/// Set a fixed worker count.
	pub fn with_workers(mut self, workers: usize) -> Self {
		self.worker_count = Some(workers);
		self
	}

	/// Set the artifact cache budget.
	pub fn with_cache_budget(mut self, bytes: usize) -> Self {
		self.cache_budget_bytes = bytes;
		self
	}

	/// Set the fallback artifact size estimate.
	pub fn with_default_artifact_bytes(mut self, bytes: usize) -> Self {
		self.default_artifact_bytes = bytes;
		self
	}

	/// Set the shard count.
	pub fn with_shards(mut self, shards: usize) -> Self {
		self.shard_count = shards;
		self
	}

	/// Bound the admission queue.
	pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
		self.max_queue_depth = Some(depth);
		self
	}

	/// Set the worker thread name prefix.
	pub fn with_thread_name_prefix(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
		self.thread_name_prefix = prefix.into();
		self
	}

	/// Resolve the worker count: explicit value, or one less than the number
	/// of available CPUs (never below one).
	pub fn resolved_worker_count(&self) -> usize {
		self.worker_count.unwrap_or_else(|| {
			let cpus = std::thread::available_parallelism()
				.map(|n| n.get())
				.unwrap_or(1);
			cpus.saturating_sub(1).max(1)
		})
	}

	/// Check all values are usable.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.worker_count == Some(0) {
			return Err(ConfigError::ZeroWorkers);
		}
		if self.shard_count == 0 {
			return Err(ConfigError::ZeroShards);
		}
		if self.max_queue_depth == Some(0) {
			return Err(ConfigError::ZeroQueueDepth);
		}
		if self.thread_name_prefix.is_empty() {
			return Err(ConfigError::EmptyThreadPrefix);
		}
		Ok(())
	}
}

impl Default for ChunkWorkConfig {
	fn default() -> Self {
		Self::DEFAULT
	}
}
