//! The two interfaces consumed from the chunk owner.
//!
//! These are the only ways the core touches live chunk state: reading the
//! authoritative version number, and copying voxel data into an immutable
//! snapshot.

use std::sync::Arc;

use crate::key::{ChunkKey, ChunkVersion};
use crate::snapshot::{ChunkSnapshot, SnapshotPool};

/// Authoritative per-chunk version numbers.
///
/// Called from worker threads for every staleness decision, so it must not
/// block and must have no side effects.
pub trait ChunkVersionProvider: Send + Sync {
	/// Latest version of `key`.
	fn current_version(&self, key: ChunkKey) -> ChunkVersion;
}

impl<T: ChunkVersionProvider + ?Sized> ChunkVersionProvider for Arc<T> {
	fn current_version(&self, key: ChunkKey) -> ChunkVersion {
		(**self).current_version(key)
	}
}

impl ChunkVersionProvider for Box<dyn ChunkVersionProvider> {
	fn current_version(&self, key: ChunkKey) -> ChunkVersion {
		(**self).current_version(key)
	}
}

/// Copies live chunk data into pooled, immutable snapshots.
///
/// Called on worker threads, concurrently for different chunks. The
/// implementation owns whatever synchronization is needed to copy without
/// tearing, and should only return a snapshot whose contents really are at
/// `expected_version`.
pub trait ChunkSnapshotSource: Send + Sync {
	/// Copy `key` into a buffer rented from `pool`.
	///
	/// Returns `None` when the chunk is unloaded, not loaded yet, or otherwise
	/// inaccessible. This is a normal outcome, not an error.
	fn try_create_snapshot(
		&self,
		key: ChunkKey,
		expected_version: ChunkVersion,
		pool: &SnapshotPool,
	) -> Option<ChunkSnapshot>;
}

impl<T: ChunkSnapshotSource + ?Sized> ChunkSnapshotSource for Arc<T> {
	fn try_create_snapshot(
		&self,
		key: ChunkKey,
		expected_version: ChunkVersion,
		pool: &SnapshotPool,
	) -> Option<ChunkSnapshot> {
		(**self).try_create_snapshot(key, expected_version, pool)
	}
}

impl ChunkSnapshotSource for Box<dyn ChunkSnapshotSource> {
	fn try_create_snapshot(
		&self,
		key: ChunkKey,
		expected_version: ChunkVersion,
		pool: &SnapshotPool,
	) -> Option<ChunkSnapshot> {
		(**self).try_create_snapshot(key, expected_version, pool)
	}
}
