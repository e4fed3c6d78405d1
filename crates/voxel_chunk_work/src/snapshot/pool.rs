//! Reusable voxel buffers for snapshots.
//!
//! Snapshot buffers are large and short-lived, so they are rented from a
//! free list and handed back when the owning [`SnapshotBuffer`] drops.
//! `rented` and `returned` counters make leaks and double returns visible.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{SnapshotDims, Voxel};

/// Pool counters at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
	/// Buffers handed out since creation.
	pub rented: u64,
	/// Buffers handed back since creation.
	pub returned: u64,
	/// Buffers currently held by the free list.
	pub retained: usize,
}

impl PoolStats {
	/// Buffers rented but not yet returned.
	pub fn outstanding(&self) -> u64 {
		self.rented - self.returned
	}
}

struct PoolInner {
	free: Mutex<Vec<Vec<Voxel>>>,
	max_retained: usize,
	rented: AtomicU64,
	returned: AtomicU64,
}

impl PoolInner {
	fn give_back(&self, mut data: Vec<Voxel>) {
		self.returned.fetch_add(1, Ordering::AcqRel);
		let mut free = self.free.lock();
		if free.len() < self.max_retained {
			data.clear();
			free.push(data);
		}
	}
}

/// Free list of snapshot buffers. Cloning shares the pool.
#[derive(Clone)]
pub struct SnapshotPool {
	inner: Arc<PoolInner>,
}

impl SnapshotPool {
	/// Default number of idle buffers kept around.
	pub const DEFAULT_RETAINED: usize = 64;

	pub fn new() -> Self {
		Self::with_retained(Self::DEFAULT_RETAINED)
	}

	/// Pool keeping at most `max_retained` idle buffers.
	pub fn with_retained(max_retained: usize) -> Self {
		Self {
			inner: Arc::new(PoolInner {
				free: Mutex::new(Vec::new()),
				max_retained,
				rented: AtomicU64::new(0),
				returned: AtomicU64::new(0),
			}),
		}
	}

	/// Rent a zeroed buffer sized for `dims`.
	pub fn rent(&self, dims: SnapshotDims) -> SnapshotBuffer {
		let len = dims.volume();
		let mut data = self.inner.free.lock().pop().unwrap_or_default();
		data.resize(len, 0);
		self.inner.rented.fetch_add(1, Ordering::AcqRel);
		SnapshotBuffer {
			dims,
			data,
			pool: Arc::clone(&self.inner),
		}
	}

	pub fn stats(&self) -> PoolStats {
		PoolStats {
			rented: self.inner.rented.load(Ordering::Acquire),
			returned: self.inner.returned.load(Ordering::Acquire),
			retained: self.inner.free.lock().len(),
		}
	}
}

impl Default for SnapshotPool {
	fn default() -> Self {
		Self::new()
	}
}

/// A rented buffer. Returned to its pool on drop.
///
/// Layout is flat with `index = x + size_x * (y + size_y * z)`.
pub struct SnapshotBuffer {
	dims: SnapshotDims,
	data: Vec<Voxel>,
	pool: Arc<PoolInner>,
}

impl SnapshotBuffer {
	pub fn dims(&self) -> SnapshotDims {
		self.dims
	}

	#[inline]
	pub fn set(&mut self, x: usize, y: usize, z: usize, voxel: Voxel) {
		let index = self.dims.index(x, y, z);
		self.data[index] = voxel;
	}

	/// Copy a full chunk worth of voxels. Panics if `voxels` has the wrong
	/// length, which is a bug in the snapshot source.
	pub fn copy_from(&mut self, voxels: &[Voxel]) {
		self.data.copy_from_slice(voxels);
	}
}

impl Deref for SnapshotBuffer {
	type Target = [Voxel];

	fn deref(&self) -> &[Voxel] {
		&self.data
	}
}

impl DerefMut for SnapshotBuffer {
	fn deref_mut(&mut self) -> &mut [Voxel] {
		&mut self.data
	}
}

impl Drop for SnapshotBuffer {
	fn drop(&mut self) {
		self.pool.give_back(std::mem::take(&mut self.data));
	}
}

impl std::fmt::Debug for SnapshotBuffer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "SnapshotBuffer({:?}, {} voxels)", self.dims, self.data.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_rent_and_return() {
		let pool = SnapshotPool::new();
		let dims = SnapshotDims::cube(4);

		let buffer = pool.rent(dims);
		assert_eq!(buffer.len(), 64);
		assert!(buffer.iter().all(|&v| v == 0));
		assert_eq!(pool.stats().outstanding(), 1);

		drop(buffer);
		let stats = pool.stats();
		assert_eq!(stats.rented, 1);
		assert_eq!(stats.returned, 1);
		assert_eq!(stats.retained, 1);
	}

	#[test]
	fn test_reused_buffer_is_zeroed() {
		let pool = SnapshotPool::new();
		let dims = SnapshotDims::cube(2);

		let mut buffer = pool.rent(dims);
		buffer.set(1, 1, 1, 9);
		drop(buffer);

		let buffer = pool.rent(dims);
		assert!(buffer.iter().all(|&v| v == 0));
		assert_eq!(pool.stats().retained, 0);
	}

	#[test]
	fn test_retained_cap() {
		let pool = SnapshotPool::with_retained(1);
		let a = pool.rent(SnapshotDims::cube(2));
		let b = pool.rent(SnapshotDims::cube(2));
		drop(a);
		drop(b);
		let stats = pool.stats();
		assert_eq!(stats.returned, 2);
		assert_eq!(stats.retained, 1);
	}
}
