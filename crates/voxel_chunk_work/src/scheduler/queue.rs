//! Banded FIFO work queue.
//!
//! ```text
//!  push(job) ──► band[High | Normal | Low] ──┐
//!           └──► doorbell: Work ─────────────┤
//!                                            ▼
//!  worker: doorbell.recv() ──► Work ──► pop_highest()
//!                          └─► Stop ──► exit loop
//! ```
//!
//! Every push rings the doorbell once, and a job is always in its band
//! before its doorbell is rung, so a worker woken by `Work` normally finds
//! something to pop. Shutdown drains bands directly, so a spare `Work`
//! with an empty queue is possible and harmless.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{self as channel, Receiver, Sender};

use super::job::ErasedJob;
use crate::result::Priority;

pub(crate) type QueuedJob = Arc<dyn ErasedJob>;

/// Message a worker wakes up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Signal {
	Work,
	Stop,
}

struct Band {
	sender: Sender<QueuedJob>,
	receiver: Receiver<QueuedJob>,
}

pub(crate) struct JobQueue {
	bands: [Band; 3],
	doorbell_tx: Sender<Signal>,
	doorbell_rx: Receiver<Signal>,
	depth: AtomicUsize,
}

impl JobQueue {
	pub fn new() -> Self {
		let band = || {
			let (sender, receiver) = channel::unbounded();
			Band { sender, receiver }
		};
		let (doorbell_tx, doorbell_rx) = channel::unbounded();
		Self {
			bands: [band(), band(), band()],
			doorbell_tx,
			doorbell_rx,
			depth: AtomicUsize::new(0),
		}
	}

	/// Append to the job's band. Never blocks.
	pub fn push(&self, job: QueuedJob) {
		let band = job.header().priority.band();
		self.depth.fetch_add(1, Ordering::AcqRel);
		// Both ends live in `self`, so sends cannot fail.
		let _ = self.bands[band].sender.send(job);
		let _ = self.doorbell_tx.send(Signal::Work);
	}

	/// Pop from the highest non-empty band.
	pub fn pop_highest(&self) -> Option<QueuedJob> {
		for priority in Priority::BANDS {
			if let Ok(job) = self.bands[priority.band()].receiver.try_recv() {
				self.depth.fetch_sub(1, Ordering::AcqRel);
				return Some(job);
			}
		}
		None
	}

	/// Block until there is work or a stop request.
	pub fn wait(&self) -> Signal {
		self.doorbell_rx.recv().unwrap_or(Signal::Stop)
	}

	/// Queue one `Stop` per worker. They are delivered after any pending
	/// `Work` signals.
	pub fn stop(&self, workers: usize) {
		for _ in 0..workers {
			let _ = self.doorbell_tx.send(Signal::Stop);
		}
	}

	/// Jobs waiting in any band, including ones already superseded but not
	/// yet skipped by a worker.
	pub fn len(&self) -> usize {
		self.depth.load(Ordering::Acquire)
	}
}
