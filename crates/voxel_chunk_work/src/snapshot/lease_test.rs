use std::sync::Barrier;
use std::thread;

use super::*;
use crate::test_utils::{chunk, Gate, MockSource};

fn registry(source: Arc<MockSource>) -> (SnapshotRegistry, Arc<ChunkWorkMetrics>) {
	let metrics = Arc::new(ChunkWorkMetrics::new());
	let registry = SnapshotRegistry::new(source, SnapshotPool::new(), 4, Arc::clone(&metrics));
	(registry, metrics)
}

#[test]
fn test_acquire_creates_snapshot_at_requested_version() {
	let source = MockSource::new();
	let (registry, metrics) = registry(Arc::clone(&source));
	let key = SnapshotKey::new(chunk(0), 3);

	let lease = registry.acquire(key);
	let snapshot = lease.snapshot().expect("snapshot should be ready");
	assert_eq!(snapshot.snapshot_key(), key);
	assert_eq!(snapshot.voxels()[0], 3);
	assert_eq!(registry.refcount(key), 1);
	assert_eq!(metrics.snapshot().snapshots_created, 1);
}

#[test]
fn test_last_release_removes_entry_and_returns_buffer() {
	let source = MockSource::new();
	let (registry, metrics) = registry(Arc::clone(&source));
	let key = SnapshotKey::new(chunk(0), 1);

	let a = registry.acquire(key);
	let b = registry.acquire(key);
	assert_eq!(registry.refcount(key), 2);
	assert_eq!(source.calls(), 1);

	drop(a);
	assert_eq!(registry.refcount(key), 1);
	assert_eq!(registry.pool().stats().outstanding(), 1);

	drop(b);
	assert_eq!(registry.refcount(key), 0);
	assert_eq!(registry.live_count(), 0);

	let stats = registry.pool().stats();
	assert_eq!(stats.rented, 1);
	assert_eq!(stats.returned, 1);
	assert_eq!(metrics.snapshot().snapshots_released, 1);
}

#[test]
fn test_concurrent_acquires_create_once() {
	let gate = Gate::new();
	let source = MockSource::gated(Arc::clone(&gate));
	let (registry, _metrics) = registry(Arc::clone(&source));
	let key = SnapshotKey::new(chunk(1), 9);
	let barrier = Barrier::new(8);

	thread::scope(|scope| {
		let handles: Vec<_> = (0..8)
			.map(|_| {
				scope.spawn(|| {
					barrier.wait();
					let lease = registry.acquire(key);
					lease.snapshot().map(|s| s.version())
				})
			})
			.collect();

		assert!(gate.wait_arrivals(1));
		gate.open();

		for handle in handles {
			assert_eq!(handle.join().unwrap(), Some(9));
		}
	});

	assert_eq!(source.calls(), 1);
	assert_eq!(registry.live_count(), 0);
	assert_eq!(registry.pool().stats().outstanding(), 0);
}

#[test]
fn test_unavailable_chunk_leaves_nothing_registered() {
	let source = MockSource::new();
	source.set_unavailable(chunk(2));
	let (registry, metrics) = registry(Arc::clone(&source));
	let key = SnapshotKey::new(chunk(2), 1);

	{
		let lease = registry.acquire(key);
		assert!(matches!(lease.outcome(), LeaseOutcome::Unavailable));
		assert!(lease.snapshot().is_none());
	}
	assert_eq!(registry.live_count(), 0);

	// A later acquire asks the source again.
	drop(registry.acquire(key));
	assert_eq!(source.calls(), 2);
	assert_eq!(metrics.snapshot().snapshots_created, 0);
	assert_eq!(metrics.snapshot().snapshots_released, 0);
}

#[test]
fn test_panicking_source_is_reported_as_failed() {
	let source = MockSource::new();
	source.set_panics(chunk(3));
	let (registry, _metrics) = registry(Arc::clone(&source));

	let lease = registry.acquire(SnapshotKey::new(chunk(3), 1));
	match lease.outcome() {
		LeaseOutcome::Failed(reason) => assert_eq!(reason, "source exploded"),
		other => panic!("expected Failed, got {other:?}"),
	}
	drop(lease);
	assert_eq!(registry.live_count(), 0);
}

#[test]
fn test_versions_are_leased_independently() {
	let source = MockSource::new();
	let (registry, _metrics) = registry(Arc::clone(&source));

	let old = registry.acquire(SnapshotKey::new(chunk(0), 1));
	let new = registry.acquire(SnapshotKey::new(chunk(0), 2));
	assert_eq!(registry.live_count(), 2);
	assert_eq!(old.snapshot().map(|s| s.voxels()[0]), Some(1));
	assert_eq!(new.snapshot().map(|s| s.voxels()[0]), Some(2));
	assert_eq!(source.calls(), 2);
}
