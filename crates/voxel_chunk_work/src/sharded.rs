//! Fixed set of independently locked shards.
//!
//! Every piece of shared mutable state in the crate is split this way so
//! that unrelated chunks never contend on the same lock. Callers pick the
//! shard from a hashable key; everything keyed by chunk hashes the
//! [`ChunkKey`](crate::key::ChunkKey) alone so all state for one chunk lives
//! in one shard.

use std::hash::{BuildHasher, Hash};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxBuildHasher;

pub(crate) struct Shards<T> {
	shards: Box<[Mutex<T>]>,
}

impl<T> Shards<T> {
	pub fn new(count: usize, mut init: impl FnMut() -> T) -> Self {
		let count = count.max(1);
		Self {
			shards: (0..count).map(|_| Mutex::new(init())).collect(),
		}
	}

	#[inline]
	fn index_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
		(FxBuildHasher.hash_one(key) as usize) % self.shards.len()
	}

	/// Lock the shard owning `key`.
	#[inline]
	pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, T> {
		self.shards[self.index_of(key)].lock()
	}

	/// Lock shard `index` directly, for walks that compare shards.
	#[inline]
	pub fn lock_at(&self, index: usize) -> MutexGuard<'_, T> {
		self.shards[index].lock()
	}

	/// Visit every shard in turn (one lock held at a time).
	pub fn for_each(&self, mut f: impl FnMut(&mut T)) {
		for shard in self.shards.iter() {
			f(&mut shard.lock());
		}
	}

	pub fn len(&self) -> usize {
		self.shards.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_key_maps_to_same_shard() {
		let shards = Shards::new(8, Vec::<u32>::new);
		shards.lock(&42u64).push(1);
		shards.lock(&42u64).push(2);
		assert_eq!(shards.lock(&42u64).len(), 2);

		let mut total = 0;
		shards.for_each(|shard| total += shard.len());
		assert_eq!(total, 2);
	}

	#[test]
	fn zero_count_still_has_one_shard() {
		let shards = Shards::new(0, || 0u8);
		assert_eq!(shards.len(), 1);
		*shards.lock("anything") += 1;
		assert_eq!(*shards.lock("else"), 1);
	}
}
