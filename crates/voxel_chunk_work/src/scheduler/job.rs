//! Queued units of work and the handles callers wait on.
//!
//! A [`Job`] is the lightweight record that sits in the queue: the artifact
//! key, a priority, the processor to run, and the callers waiting for the
//! result. It never holds chunk data; the snapshot is leased only once a
//! worker starts running it.
//!
//! ```text
//!            try_start()                finish()
//!  Queued ───────────────► Running ─────────────────► Done
//!    │                                                  ▲
//!    └──────────────── try_claim_queued() ──────────────┘
//!                      (superseded / canceled while queued)
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use smallvec::SmallVec;
use web_time::{Duration, Instant};

use super::SchedulerState;
use crate::cancel::CancellationToken;
use crate::error::ChunkWorkError;
use crate::key::ArtifactKey;
use crate::processor::ChunkProcessor;
use crate::result::{ChunkWorkResult, ChunkWorkStatus, Priority};

/// Unique identifier for one admitted unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct JobId(u64);

impl JobId {
	fn next() -> Self {
		static COUNTER: AtomicU64 = AtomicU64::new(0);
		Self(COUNTER.fetch_add(1, Ordering::Relaxed))
	}
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

/// Type-independent part of a job.
pub(crate) struct JobHeader {
	pub id: JobId,
	pub key: ArtifactKey,
	pub priority: Priority,
	pub admitted_at: Instant,
	state: AtomicU8,
}

impl JobHeader {
	fn new(key: ArtifactKey, priority: Priority) -> Self {
		Self {
			id: JobId::next(),
			key,
			priority,
			admitted_at: Instant::now(),
			state: AtomicU8::new(QUEUED),
		}
	}

	/// Queued -> Running. Fails if the job was already claimed.
	pub fn try_start(&self) -> bool {
		self.state
			.compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	/// Queued -> Done, for completing a job that never ran.
	pub fn try_claim_queued(&self) -> bool {
		self.state
			.compare_exchange(QUEUED, DONE, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	pub fn is_queued(&self) -> bool {
		self.state.load(Ordering::Acquire) == QUEUED
	}
}

/// A job whose artifact type has been erased, as stored in the queue and
/// the bookkeeping maps.
pub(crate) trait ErasedJob: Send + Sync {
	fn header(&self) -> &JobHeader;

	/// Execute on the current worker thread. Caller has won `try_start`.
	fn run(&self, state: &SchedulerState);

	/// Deliver a terminal non-success result without running.
	fn complete(&self, state: &SchedulerState, status: ChunkWorkStatus, reason: &str);

	fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct Waiter<A> {
	sender: Sender<ChunkWorkResult<A>>,
	cancel: CancellationToken,
}

struct Waiters<A> {
	list: SmallVec<[Waiter<A>; 1]>,
	finished: Option<ChunkWorkResult<A>>,
}

/// A typed unit of work shared by every caller that asked for the same
/// artifact key.
pub(crate) struct Job<P: ChunkProcessor> {
	pub header: JobHeader,
	pub processor: Arc<P>,
	waiters: Mutex<Waiters<P::Artifact>>,
}

impl<P: ChunkProcessor> Job<P> {
	pub fn new(key: ArtifactKey, priority: Priority, processor: Arc<P>) -> Arc<Self> {
		Arc::new(Self {
			header: JobHeader::new(key, priority),
			processor,
			waiters: Mutex::new(Waiters {
				list: SmallVec::new(),
				finished: None,
			}),
		})
	}

	/// Register a caller. A job that already finished answers immediately.
	pub fn attach(&self, cancel: CancellationToken) -> ChunkWorkHandle<P::Artifact> {
		let (sender, receiver) = channel::bounded(1);
		let mut waiters = self.waiters.lock();
		match &waiters.finished {
			Some(result) => {
				let _ = sender.send(result.clone());
			}
			None => waiters.list.push(Waiter { sender, cancel }),
		}
		ChunkWorkHandle::new(self.header.key.clone(), receiver)
	}

	/// True once every attached caller has cancelled.
	pub fn callers_cancelled(&self) -> bool {
		let waiters = self.waiters.lock();
		!waiters.list.is_empty() && waiters.list.iter().all(|w| w.cancel.is_cancelled())
	}

	/// Publish the terminal result to every caller, exactly once.
	///
	/// A caller whose own token fired gets `Canceled` instead of the shared
	/// result.
	pub fn finish(&self, state: &SchedulerState, result: ChunkWorkResult<P::Artifact>) {
		// Forget first so a request racing with delivery starts fresh work
		// instead of attaching to a finished job.
		state.forget(&self.header);

		let mut waiters = self.waiters.lock();
		if waiters.finished.is_some() {
			debug_assert!(false, "job finished twice");
			return;
		}
		state.metrics.record_completion(result.status);
		for waiter in waiters.list.drain(..) {
			let delivered = if waiter.cancel.is_cancelled() && result.status != ChunkWorkStatus::Canceled {
				ChunkWorkResult::terminal(ChunkWorkStatus::Canceled, &self.header.key, "canceled by caller")
			} else {
				result.clone()
			};
			// Dropped handle = caller no longer interested.
			let _ = waiter.sender.send(delivered);
		}
		waiters.finished = Some(result);
	}
}

impl<P: ChunkProcessor> ErasedJob for Job<P> {
	fn header(&self) -> &JobHeader {
		&self.header
	}

	fn run(&self, state: &SchedulerState) {
		super::worker::run_job(self, state);
	}

	fn complete(&self, state: &SchedulerState, status: ChunkWorkStatus, reason: &str) {
		debug_assert!(status != ChunkWorkStatus::Success);
		self.finish(state, ChunkWorkResult::terminal(status, &self.header.key, reason));
	}

	fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
		self
	}
}

// =============================================================================
// ChunkWorkHandle
// =============================================================================

/// Pending result of a request.
///
/// Every handle yields exactly one [`ChunkWorkResult`]. Poll it once per
/// frame from the owner thread, or block on it from anywhere else.
pub struct ChunkWorkHandle<A> {
	key: ArtifactKey,
	receiver: Receiver<ChunkWorkResult<A>>,
	taken: bool,
}

impl<A> ChunkWorkHandle<A> {
	fn new(key: ArtifactKey, receiver: Receiver<ChunkWorkResult<A>>) -> Self {
		Self {
			key,
			receiver,
			taken: false,
		}
	}

	/// Handle that is already resolved.
	pub(crate) fn ready(result: ChunkWorkResult<A>) -> Self {
		let (sender, receiver) = channel::bounded(1);
		let key = result.artifact_key();
		let _ = sender.send(result);
		Self::new(key, receiver)
	}

	pub fn key(&self) -> &ArtifactKey {
		&self.key
	}

	/// True when a delivered result is waiting to be taken.
	pub fn is_ready(&self) -> bool {
		!self.taken && !self.receiver.is_empty()
	}

	/// Take the result if it is available (non-blocking).
	///
	/// Returns `Some` once; later calls return `None`. Work that was dropped
	/// without delivering resolves as `Failed(Unknown)`.
	pub fn poll(&mut self) -> Option<ChunkWorkResult<A>> {
		if self.taken {
			return None;
		}
		let result = match self.receiver.try_recv() {
			Ok(result) => result,
			Err(TryRecvError::Empty) => return None,
			Err(TryRecvError::Disconnected) => self.lost(),
		};
		self.taken = true;
		Some(result)
	}

	/// Block until the result is available.
	pub fn wait(self) -> ChunkWorkResult<A> {
		match self.receiver.recv() {
			Ok(result) => result,
			Err(_) => self.lost(),
		}
	}

	/// Block for at most `timeout`. Like [`poll`](Self::poll), yields the
	/// result once.
	pub fn wait_timeout(&mut self, timeout: Duration) -> Option<ChunkWorkResult<A>> {
		if self.taken {
			return None;
		}
		let result = match self.receiver.recv_timeout(timeout) {
			Ok(result) => result,
			Err(RecvTimeoutError::Timeout) => return None,
			Err(RecvTimeoutError::Disconnected) => self.lost(),
		};
		self.taken = true;
		Some(result)
	}

	fn lost(&self) -> ChunkWorkResult<A> {
		ChunkWorkResult::failed(&self.key, ChunkWorkError::Unknown, "work dropped without a result")
	}
}

impl<A> std::fmt::Debug for ChunkWorkHandle<A> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChunkWorkHandle")
			.field("key", &self.key)
			.field("ready", &self.is_ready())
			.finish()
	}
}
