//! Fixtures shared by the unit tests: an in-memory chunk owner, a
//! controllable processor and a gate for holding workers in place.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::IVec3;
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cancel::CancelCheck;
use crate::error::ProcessError;
use crate::key::{ChunkKey, ChunkVersion, ProcessorId, SnapshotKey, WorldId};
use crate::processor::ChunkProcessor;
use crate::snapshot::{ChunkSnapshot, SnapshotDims, SnapshotPool, Voxel};
use crate::source::{ChunkSnapshotSource, ChunkVersionProvider};

pub(crate) const TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_test_writer()
		.with_max_level(tracing::Level::DEBUG)
		.try_init();
}

pub(crate) fn chunk(x: i32) -> ChunkKey {
	ChunkKey::new(WorldId::from_raw(7), IVec3::new(x, 0, 0))
}

// =============================================================================
// Gate
// =============================================================================

#[derive(Default)]
struct GateState {
	open: bool,
	arrived: usize,
}

/// Latch that holds processors (or the source) until opened.
#[derive(Default)]
pub(crate) struct Gate {
	state: Mutex<GateState>,
	cv: Condvar,
}

impl Gate {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn open(&self) {
		self.state.lock().open = true;
		self.cv.notify_all();
	}

	pub fn arrive(&self) {
		self.state.lock().arrived += 1;
		self.cv.notify_all();
	}

	pub fn is_open(&self) -> bool {
		self.state.lock().open
	}

	/// Wait up to `timeout` for the gate to open.
	pub fn wait_open(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut state = self.state.lock();
		while !state.open {
			if self.cv.wait_until(&mut state, deadline).timed_out() {
				return state.open;
			}
		}
		true
	}

	/// Wait until at least `count` threads have arrived.
	pub fn wait_arrivals(&self, count: usize) -> bool {
		let deadline = Instant::now() + TIMEOUT;
		let mut state = self.state.lock();
		while state.arrived < count {
			if self.cv.wait_until(&mut state, deadline).timed_out() {
				return state.arrived >= count;
			}
		}
		true
	}
}

// =============================================================================
// Chunk owner
// =============================================================================

/// Versions stored in a map; unknown chunks are at version 0.
#[derive(Default)]
pub(crate) struct MockVersions {
	versions: Mutex<FxHashMap<ChunkKey, ChunkVersion>>,
}

impl MockVersions {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn set(&self, key: ChunkKey, version: ChunkVersion) {
		self.versions.lock().insert(key, version);
	}
}

impl ChunkVersionProvider for MockVersions {
	fn current_version(&self, key: ChunkKey) -> ChunkVersion {
		self.versions.lock().get(&key).copied().unwrap_or(0)
	}
}

/// Produces snapshots filled with the low bits of the requested version.
pub(crate) struct MockSource {
	dims: SnapshotDims,
	calls: AtomicUsize,
	unavailable: Mutex<FxHashSet<ChunkKey>>,
	panics: Mutex<FxHashSet<ChunkKey>>,
	gate: Option<Arc<Gate>>,
}

impl MockSource {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::with_gate(None))
	}

	pub fn gated(gate: Arc<Gate>) -> Arc<Self> {
		Arc::new(Self::with_gate(Some(gate)))
	}

	fn with_gate(gate: Option<Arc<Gate>>) -> Self {
		Self {
			dims: SnapshotDims::cube(4),
			calls: AtomicUsize::new(0),
			unavailable: Mutex::default(),
			panics: Mutex::default(),
			gate,
		}
	}

	pub fn set_unavailable(&self, key: ChunkKey) {
		self.unavailable.lock().insert(key);
	}

	pub fn set_panics(&self, key: ChunkKey) {
		self.panics.lock().insert(key);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl ChunkSnapshotSource for MockSource {
	fn try_create_snapshot(
		&self,
		key: ChunkKey,
		expected_version: ChunkVersion,
		pool: &SnapshotPool,
	) -> Option<ChunkSnapshot> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if let Some(gate) = &self.gate {
			gate.arrive();
			gate.wait_open(TIMEOUT);
		}
		if self.panics.lock().contains(&key) {
			panic!("source exploded");
		}
		if self.unavailable.lock().contains(&key) {
			return None;
		}
		let mut buffer = pool.rent(self.dims);
		buffer.fill(expected_version as Voxel);
		Some(ChunkSnapshot::new(key, expected_version, buffer))
	}
}

// =============================================================================
// Processor
// =============================================================================

/// What a [`TestProcessor`] does once past its gate.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Behavior {
	Succeed,
	Fail(&'static str),
	Panic(&'static str),
	/// Succeeds without ever looking at the cancel check.
	IgnoreCancel,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TestArtifact {
	pub snapshot: SnapshotKey,
	pub first_voxel: Voxel,
}

/// Records every call, optionally parks on a gate, then acts per `behavior`.
pub(crate) struct TestProcessor {
	id: ProcessorId,
	behavior: Behavior,
	gate: Option<Arc<Gate>>,
	bytes: Option<usize>,
	seen: Mutex<Vec<SnapshotKey>>,
}

impl TestProcessor {
	pub fn new(id: &str) -> Self {
		Self {
			id: ProcessorId::new(id),
			behavior: Behavior::Succeed,
			gate: None,
			bytes: None,
			seen: Mutex::default(),
		}
	}

	pub fn behavior(mut self, behavior: Behavior) -> Self {
		self.behavior = behavior;
		self
	}

	pub fn gate(mut self, gate: &Arc<Gate>) -> Self {
		self.gate = Some(Arc::clone(gate));
		self
	}

	pub fn bytes(mut self, bytes: usize) -> Self {
		self.bytes = Some(bytes);
		self
	}

	pub fn calls(&self) -> usize {
		self.seen.lock().len()
	}

	/// Snapshot keys in processing order.
	pub fn seen(&self) -> Vec<SnapshotKey> {
		self.seen.lock().clone()
	}
}

impl ChunkProcessor for TestProcessor {
	type Artifact = TestArtifact;

	fn id(&self) -> ProcessorId {
		self.id.clone()
	}

	fn process(&self, snapshot: &ChunkSnapshot, cancel: &CancelCheck<'_>) -> Result<TestArtifact, ProcessError> {
		self.seen.lock().push(snapshot.snapshot_key());
		let observe_cancel = !matches!(self.behavior, Behavior::IgnoreCancel);

		if let Some(gate) = &self.gate {
			gate.arrive();
			let deadline = Instant::now() + TIMEOUT;
			while !gate.wait_open(Duration::from_millis(1)) {
				if observe_cancel {
					cancel.check()?;
				}
				if Instant::now() > deadline {
					return Err(ProcessError::failed("gate never opened"));
				}
			}
		}
		if observe_cancel {
			cancel.check()?;
		}

		match self.behavior {
			Behavior::Fail(reason) => Err(ProcessError::failed(reason)),
			Behavior::Panic(message) => panic!("{message}"),
			Behavior::Succeed | Behavior::IgnoreCancel => Ok(TestArtifact {
				snapshot: snapshot.snapshot_key(),
				first_voxel: snapshot.voxels().first().copied().unwrap_or(0),
			}),
		}
	}

	fn estimated_bytes(&self, _artifact: &TestArtifact) -> Option<usize> {
		self.bytes
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gate_stays_closed_while_others_arrive() {
		let gate = Gate::new();
		let arriving = Arc::clone(&gate);
		let arrivals = std::thread::spawn(move || {
			for _ in 0..5 {
				std::thread::sleep(Duration::from_millis(5));
				arriving.arrive();
			}
		});

		assert!(!gate.wait_open(Duration::from_millis(100)));
		arrivals.join().expect("arrival thread");
		assert!(gate.wait_arrivals(5));
		assert!(!gate.is_open());

		gate.open();
		assert!(gate.wait_open(Duration::from_millis(1)));
	}
}
