//! Engine-agnostic metrics for the chunk work scheduler.
//!
//! Counters and gauges are plain atomics and always maintained. Timing
//! windows are feature-gated and runtime-toggled so they cost nothing when
//! disabled.
//!
//! # Usage
//!
//! ```ignore
//! use voxel_chunk_work::metrics::COLLECT_METRICS;
//!
//! // Compile with --features metrics (default), toggle at runtime:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! let snapshot = service.metrics();
//! println!("hit rate {:.2}, queued {}", snapshot.cache_hit_rate(), snapshot.queue_depth);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use web_time::{Duration, Instant};

use crate::result::ChunkWorkStatus;

/// Runtime toggle for timing collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if timing collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
	#[cfg(feature = "metrics")]
	{
		COLLECT_METRICS.load(Ordering::Relaxed)
	}
	#[cfg(not(feature = "metrics"))]
	{
		false
	}
}

/// Whole microseconds in `duration`, saturating at `u64::MAX`.
#[inline]
pub fn duration_micros(duration: Duration) -> u64 {
	u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Rolling window for storing recent values (e.g., timing history).
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
	buffer: VecDeque<T>,
	capacity: usize,
}

impl<T> RollingWindow<T> {
	/// Create a new rolling window with the given capacity.
	pub fn new(capacity: usize) -> Self {
		Self {
			buffer: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	/// Push a new value, evicting the oldest if at capacity.
	pub fn push(&mut self, value: T) {
		if self.buffer.len() >= self.capacity {
			self.buffer.pop_front();
		}
		self.buffer.push_back(value);
	}

	pub fn len(&self) -> usize {
		self.buffer.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buffer.is_empty()
	}

	pub fn clear(&mut self) {
		self.buffer.clear();
	}

	/// Iterate over values (oldest to newest).
	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.buffer.iter()
	}

	/// Get the most recent value.
	pub fn last(&self) -> Option<&T> {
		self.buffer.back()
	}
}

impl RollingWindow<u64> {
	/// Compute the average of all values.
	pub fn average(&self) -> f64 {
		if self.buffer.is_empty() {
			0.0
		} else {
			self.buffer.iter().sum::<u64>() as f64 / self.buffer.len() as f64
		}
	}

	/// Get min and max values.
	pub fn min_max(&self) -> Option<(u64, u64)> {
		let min = *self.buffer.iter().min()?;
		let max = *self.buffer.iter().max()?;
		Some((min, max))
	}
}

impl Default for RollingWindow<u64> {
	fn default() -> Self {
		Self::new(128)
	}
}

/// Which timing window a measurement goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timing {
	/// Snapshot Source copy time.
	Snapshot,
	/// Processor run time.
	Process,
	/// Time between admission and a worker picking the job up.
	QueueWait,
}

/// Rolling timing windows in microseconds.
#[derive(Debug, Clone, Default)]
pub struct TimingWindows {
	pub snapshot_us: RollingWindow<u64>,
	pub process_us: RollingWindow<u64>,
	pub queue_wait_us: RollingWindow<u64>,
}

impl TimingWindows {
	fn window_mut(&mut self, timing: Timing) -> &mut RollingWindow<u64> {
		match timing {
			Timing::Snapshot => &mut self.snapshot_us,
			Timing::Process => &mut self.process_us,
			Timing::QueueWait => &mut self.queue_wait_us,
		}
	}
}

/// Live counters shared by the service, workers, registry and cache.
#[derive(Debug, Default)]
pub struct ChunkWorkMetrics {
	requests: AtomicU64,
	cache_hits: AtomicU64,
	cache_misses: AtomicU64,
	deduplicated: AtomicU64,
	enqueued: AtomicU64,
	snapshots_created: AtomicU64,
	snapshots_released: AtomicU64,
	cache_evictions: AtomicU64,

	success: AtomicU64,
	superseded: AtomicU64,
	canceled: AtomicU64,
	failed: AtomicU64,
	chunk_unavailable: AtomicU64,
	rejected: AtomicU64,

	in_flight: AtomicUsize,

	timings: Mutex<TimingWindows>,
}

macro_rules! counter_fns {
	($($inc:ident => $field:ident),* $(,)?) => {
		$(
			#[inline]
			pub(crate) fn $inc(&self) {
				self.$field.fetch_add(1, Ordering::Relaxed);
			}
		)*
	};
}

impl ChunkWorkMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	counter_fns! {
		record_request => requests,
		record_cache_hit => cache_hits,
		record_cache_miss => cache_misses,
		record_dedup => deduplicated,
		record_enqueue => enqueued,
		record_snapshot_created => snapshots_created,
		record_snapshot_released => snapshots_released,
		record_cache_eviction => cache_evictions,
	}

	/// Count one terminal result delivered for a unit of work.
	pub(crate) fn record_completion(&self, status: ChunkWorkStatus) {
		let counter = match status {
			ChunkWorkStatus::Success => &self.success,
			ChunkWorkStatus::Superseded => &self.superseded,
			ChunkWorkStatus::Canceled => &self.canceled,
			ChunkWorkStatus::Failed => &self.failed,
			ChunkWorkStatus::ChunkUnavailable => &self.chunk_unavailable,
			ChunkWorkStatus::Rejected => &self.rejected,
		};
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn job_started(&self) {
		self.in_flight.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn job_finished(&self) {
		self.in_flight.fetch_sub(1, Ordering::Relaxed);
	}

	/// Record a timing sample.
	pub fn record_timing(&self, timing: Timing, micros: u64) {
		if is_enabled() {
			self.timings.lock().window_mut(timing).push(micros);
		}
	}

	/// Start a timer that records into `timing` when dropped.
	pub fn time(&self, timing: Timing) -> ScopedTimer<'_> {
		ScopedTimer {
			metrics: self,
			timing,
			start: Instant::now(),
		}
	}

	/// Copy of the timing windows.
	pub fn timings(&self) -> TimingWindows {
		self.timings.lock().clone()
	}

	/// Counter values. Queue and cache gauges are filled in by the service.
	pub fn snapshot(&self) -> MetricsSnapshot {
		let timings = self.timings.lock();
		MetricsSnapshot {
			requests: self.requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			cache_misses: self.cache_misses.load(Ordering::Relaxed),
			deduplicated: self.deduplicated.load(Ordering::Relaxed),
			enqueued: self.enqueued.load(Ordering::Relaxed),
			snapshots_created: self.snapshots_created.load(Ordering::Relaxed),
			snapshots_released: self.snapshots_released.load(Ordering::Relaxed),
			cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
			success: self.success.load(Ordering::Relaxed),
			superseded: self.superseded.load(Ordering::Relaxed),
			canceled: self.canceled.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			chunk_unavailable: self.chunk_unavailable.load(Ordering::Relaxed),
			rejected: self.rejected.load(Ordering::Relaxed),
			in_flight: self.in_flight.load(Ordering::Relaxed),
			queue_depth: 0,
			cache_bytes: 0,
			cache_entries: 0,
			avg_snapshot_us: timings.snapshot_us.average(),
			avg_process_us: timings.process_us.average(),
			avg_queue_wait_us: timings.queue_wait_us.average(),
		}
	}
}

/// Records elapsed time into a [`ChunkWorkMetrics`] window on drop.
pub struct ScopedTimer<'a> {
	metrics: &'a ChunkWorkMetrics,
	timing: Timing,
	start: Instant,
}

impl Drop for ScopedTimer<'_> {
	fn drop(&mut self) {
		let micros = duration_micros(self.start.elapsed());
		self.metrics.record_timing(self.timing, micros);
	}
}

/// Point-in-time copy of all counters and gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsSnapshot {
	pub requests: u64,
	pub cache_hits: u64,
	pub cache_misses: u64,
	/// Requests attached to already queued or running work.
	pub deduplicated: u64,
	pub enqueued: u64,
	pub snapshots_created: u64,
	pub snapshots_released: u64,
	pub cache_evictions: u64,

	pub success: u64,
	pub superseded: u64,
	pub canceled: u64,
	pub failed: u64,
	pub chunk_unavailable: u64,
	pub rejected: u64,

	/// Jobs currently running on a worker.
	pub in_flight: usize,
	/// Jobs waiting in the admission queue (including lazily skipped ones).
	pub queue_depth: usize,
	pub cache_bytes: usize,
	pub cache_entries: usize,

	pub avg_snapshot_us: f64,
	pub avg_process_us: f64,
	pub avg_queue_wait_us: f64,
}

impl MetricsSnapshot {
	/// Fraction of cache lookups that hit. 0 when nothing was looked up.
	pub fn cache_hit_rate(&self) -> f64 {
		let lookups = self.cache_hits + self.cache_misses;
		if lookups == 0 {
			0.0
		} else {
			self.cache_hits as f64 / lookups as f64
		}
	}

	/// Units of work that reached a terminal state.
	pub fn total_completed(&self) -> u64 {
		self.success + self.superseded + self.canceled + self.failed + self.chunk_unavailable + self.rejected
	}
}
