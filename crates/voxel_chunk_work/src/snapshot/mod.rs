//! Immutable chunk snapshots.
//!
//! ```text
//!  live chunk (owner thread)          worker threads
//!  ┌──────────────┐  try_create   ┌──────────────────┐
//!  │ mutable data ├──────────────►│ ChunkSnapshot    │◄── processor A
//!  └──────────────┘  (copy once)  │ (key, version)   │◄── processor B
//!                                 └────────┬─────────┘
//!                                          │ last lease released
//!                                          ▼
//!                                   SnapshotPool (buffer reused)
//! ```
//!
//! A snapshot is created lazily by the first worker that needs a given
//! `(ChunkKey, Version)`, shared through the [`lease`] registry, and
//! destroyed when the last lease is released.

pub mod lease;
pub mod pool;

pub use lease::{LeaseOutcome, SnapshotLease, SnapshotRegistry};
pub use pool::{PoolStats, SnapshotBuffer, SnapshotPool};

use crate::key::{ChunkKey, ChunkVersion, SnapshotKey};

/// One voxel word. Its meaning belongs to the chunk owner and processors.
pub type Voxel = u16;

/// Snapshot extents in voxels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotDims {
	pub x: usize,
	pub y: usize,
	pub z: usize,
}

impl SnapshotDims {
	pub const fn new(x: usize, y: usize, z: usize) -> Self {
		Self { x, y, z }
	}

	pub const fn cube(size: usize) -> Self {
		Self::new(size, size, size)
	}

	#[inline]
	pub const fn volume(&self) -> usize {
		self.x * self.y * self.z
	}

	/// Flat index: `x + size_x * (y + size_y * z)`.
	#[inline]
	pub const fn index(&self, x: usize, y: usize, z: usize) -> usize {
		x + self.x * (y + self.y * z)
	}

	/// Inverse of [`index`](Self::index).
	#[inline]
	pub const fn coord(&self, index: usize) -> (usize, usize, usize) {
		let x = index % self.x;
		let yz = index / self.x;
		(x, yz % self.y, yz / self.y)
	}
}

/// Immutable view of one chunk's voxels at one version.
#[derive(Debug)]
pub struct ChunkSnapshot {
	key: SnapshotKey,
	buffer: SnapshotBuffer,
}

impl ChunkSnapshot {
	/// Freeze a filled buffer. No mutation is possible afterwards.
	pub fn new(key: ChunkKey, version: ChunkVersion, buffer: SnapshotBuffer) -> Self {
		Self {
			key: SnapshotKey::new(key, version),
			buffer,
		}
	}

	pub fn key(&self) -> ChunkKey {
		self.key.key
	}

	pub fn version(&self) -> ChunkVersion {
		self.key.version
	}

	pub fn snapshot_key(&self) -> SnapshotKey {
		self.key
	}

	pub fn dims(&self) -> SnapshotDims {
		self.buffer.dims()
	}

	pub fn voxels(&self) -> &[Voxel] {
		&self.buffer
	}

	#[inline]
	pub fn get(&self, x: usize, y: usize, z: usize) -> Voxel {
		self.buffer[self.dims().index(x, y, z)]
	}
}
