//! Long-lived workers on a named rayon pool.
//!
//! Each worker blocks on the queue doorbell, pops the highest-priority job
//! and runs it to a terminal result:
//!
//! ```text
//! pop ─► try_start? ─no──► skip (superseded while queued)
//!          │yes
//!          ▼
//!    callers cancelled? ──► Canceled
//!    live != version?   ──► Superseded
//!          ▼
//!    lease snapshot ──► Unavailable ──► Superseded | ChunkUnavailable
//!          │        └─► Failed      ──► Failed(SnapshotFailed)
//!          ▼
//!    process (catch_unwind) ──► Err / panic ──► Canceled | Superseded | Failed
//!          ▼
//!    release lease
//!          ▼
//!    live == version? ──no──► Superseded (artifact discarded)
//!          │yes
//!          ▼
//!    cache insert ──► Success
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::{self as channel, Receiver, Sender};

use super::job::{ErasedJob, Job};
use super::queue::{QueuedJob, Signal};
use super::SchedulerState;
use crate::cancel::{CancelCheck, CancellationToken};
use crate::error::{panic_message, ChunkWorkError, ProcessError};
use crate::key::ArtifactKey;
use crate::metrics::{duration_micros, Timing};
use crate::processor::ChunkProcessor;
use crate::result::{ChunkWorkResult, ChunkWorkStatus};
use crate::snapshot::{ChunkSnapshot, LeaseOutcome};

/// Sends the worker index when the worker loop exits, including by unwinding.
struct ExitNotice {
	index: usize,
	sender: Sender<usize>,
}

impl Drop for ExitNotice {
	fn drop(&mut self) {
		let _ = self.sender.send(self.index);
	}
}

/// Fixed set of worker loops occupying every thread of a dedicated pool.
pub(crate) struct WorkerPool {
	// Held so the threads outlive construction.
	_pool: rayon::ThreadPool,
	workers: usize,
	exited: Receiver<usize>,
}

impl WorkerPool {
	pub fn start(state: &Arc<SchedulerState>) -> Result<Self, rayon::ThreadPoolBuildError> {
		let workers = state.config.resolved_worker_count();
		let prefix = state.config.thread_name_prefix.clone();

		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(workers)
			.thread_name(move |index| format!("{prefix}-{index}"))
			.panic_handler(|payload| {
				tracing::error!(reason = %panic_message(payload.as_ref()), "chunk worker panicked");
			})
			.build()?;

		let (sender, exited) = channel::bounded(workers);
		for index in 0..workers {
			let state = Arc::clone(state);
			let notice = ExitNotice {
				index,
				sender: sender.clone(),
			};
			pool.spawn(move || {
				let _notice = notice;
				worker_loop(index, &state);
			});
		}

		tracing::info!(workers, "chunk work pool started");
		Ok(Self {
			_pool: pool,
			workers,
			exited,
		})
	}

	pub fn len(&self) -> usize {
		self.workers
	}

	/// Block until every worker loop has returned. Workers must already have
	/// been sent a `Stop` each.
	pub fn join(&self) {
		for _ in 0..self.workers {
			if self.exited.recv().is_err() {
				break;
			}
		}
	}
}

fn worker_loop(index: usize, state: &SchedulerState) {
	tracing::debug!(worker = index, "chunk worker started");
	loop {
		match state.queue.wait() {
			Signal::Stop => break,
			Signal::Work => {
				if let Some(job) = state.queue.pop_highest() {
					dispatch(job, state);
				}
			}
		}
	}
	tracing::debug!(worker = index, "chunk worker stopped");
}

fn dispatch(job: QueuedJob, state: &SchedulerState) {
	let header = job.header();
	if !header.try_start() {
		tracing::trace!(key = %header.key.key, version = header.key.version, "skipping completed queue entry");
		return;
	}

	let waited = duration_micros(header.admitted_at.elapsed());
	state.metrics.record_timing(Timing::QueueWait, waited);

	if state.is_shutting_down() {
		job.complete(state, ChunkWorkStatus::Canceled, "service shut down");
		return;
	}
	job.run(state);
}

// =============================================================================
// Job execution
// =============================================================================

/// Run one started job and deliver its result.
pub(crate) fn run_job<P: ChunkProcessor>(job: &Job<P>, state: &SchedulerState) {
	let key = &job.header.key;
	let _span = tracing::debug_span!(
		"chunk_work::run_job",
		key = %key.key,
		version = key.version,
		processor = %key.processor
	)
	.entered();

	state.metrics.job_started();
	let result = execute(job, state);
	state.metrics.job_finished();

	tracing::trace!(status = %result.status, "job complete");
	job.finish(state, result);
}

fn execute<P: ChunkProcessor>(job: &Job<P>, state: &SchedulerState) -> ChunkWorkResult<P::Artifact> {
	let key = &job.header.key;

	if job.callers_cancelled() {
		return ChunkWorkResult::terminal(ChunkWorkStatus::Canceled, key, "canceled before start");
	}

	// Cheap short-circuit before touching the snapshot registry.
	let live = state.versions.current_version(key.key);
	if live != key.version {
		return ChunkWorkResult::terminal(ChunkWorkStatus::Superseded, key, "version changed while queued");
	}

	state.cancel_stale_running(key.key, live);
	let running = state.register_running(key.key, key.version, job.header.id);

	let artifact = {
		let lease = state.registry.acquire(key.snapshot_key());
		let processed = match lease.outcome() {
			LeaseOutcome::Ready(snapshot) => process(job, snapshot, running.token(), state),
			LeaseOutcome::Unavailable => Err(unavailable(key, state)),
			LeaseOutcome::Failed(reason) => Err(ChunkWorkResult::failed(
				key,
				ChunkWorkError::SnapshotFailed,
				format!("snapshot source panicked: {reason}"),
			)),
		};
		match processed {
			Ok(artifact) => artifact,
			Err(result) => return result,
		}
	};

	publish(job, artifact, state)
}

fn unavailable<A>(key: &ArtifactKey, state: &SchedulerState) -> ChunkWorkResult<A> {
	if state.versions.current_version(key.key) != key.version {
		ChunkWorkResult::terminal(ChunkWorkStatus::Superseded, key, "version changed before snapshot")
	} else {
		ChunkWorkResult::terminal(ChunkWorkStatus::ChunkUnavailable, key, "chunk not available")
	}
}

fn process<P: ChunkProcessor>(
	job: &Job<P>,
	snapshot: &ChunkSnapshot,
	chunk_token: &CancellationToken,
	state: &SchedulerState,
) -> Result<P::Artifact, ChunkWorkResult<P::Artifact>> {
	let key = &job.header.key;
	let callers_cancelled = || job.callers_cancelled();
	let cancel = CancelCheck::linked(&callers_cancelled, chunk_token);

	let processed = {
		let _span = tracing::trace_span!("process").entered();
		let _timer = state.metrics.time(Timing::Process);
		panic::catch_unwind(AssertUnwindSafe(|| job.processor.process(snapshot, &cancel)))
	};

	match processed {
		Ok(Ok(artifact)) => Ok(artifact),
		Ok(Err(ProcessError::Canceled)) => {
			let result = if cancel.caller_cancelled() {
				ChunkWorkResult::terminal(ChunkWorkStatus::Canceled, key, "canceled during processing")
			} else if cancel.chunk_cancelled() {
				ChunkWorkResult::terminal(ChunkWorkStatus::Superseded, key, "version changed during processing")
			} else {
				ChunkWorkResult::terminal(ChunkWorkStatus::Canceled, key, "processor stopped early")
			};
			Err(result)
		}
		Ok(Err(ProcessError::Failed(reason))) => {
			tracing::warn!(%reason, "processor failed");
			Err(ChunkWorkResult::failed(key, ChunkWorkError::ProcessorFailed, reason))
		}
		Err(payload) => {
			let reason = panic_message(payload.as_ref());
			tracing::warn!(%reason, "processor panicked");
			Err(ChunkWorkResult::failed(
				key,
				ChunkWorkError::ProcessorFailed,
				format!("processor panicked: {reason}"),
			))
		}
	}
}

/// Final version check; only a still-current artifact reaches the cache.
fn publish<P: ChunkProcessor>(job: &Job<P>, artifact: P::Artifact, state: &SchedulerState) -> ChunkWorkResult<P::Artifact> {
	let key = &job.header.key;
	let live = state.versions.current_version(key.key);
	if live != key.version {
		tracing::debug!(live, "discarding artifact for a replaced version");
		return ChunkWorkResult::terminal(ChunkWorkStatus::Superseded, key, "version changed during processing");
	}

	let bytes = job
		.processor
		.estimated_bytes(&artifact)
		.unwrap_or(state.config.default_artifact_bytes);
	let artifact = Arc::new(artifact);
	state.cache.insert(key.clone(), Arc::clone(&artifact), bytes);
	ChunkWorkResult::success(key, artifact)
}
