use glam::IVec3;

use super::*;
use crate::key::{ProcessorId, WorldId};

fn chunk(x: i32) -> ChunkKey {
	ChunkKey::new(WorldId::from_raw(1), IVec3::new(x, 0, 0))
}

fn key(x: i32, version: ChunkVersion, processor: &str) -> ArtifactKey {
	ArtifactKey::new(chunk(x), version, ProcessorId::new(processor))
}

fn single_shard(budget: usize) -> ArtifactCache {
	ArtifactCache::new(budget, 1, Arc::new(ChunkWorkMetrics::new()))
}

fn sharded(budget: usize) -> ArtifactCache {
	ArtifactCache::new(
		budget,
		crate::config::ChunkWorkConfig::DEFAULT_SHARD_COUNT,
		Arc::new(ChunkWorkMetrics::new()),
	)
}

#[test]
fn test_hit_while_version_is_live() {
	let cache = single_shard(1024);
	cache.insert(key(0, 5, "sdf"), Arc::new(42u32), 16);

	let hit = cache.get::<u32>(&key(0, 5, "sdf"), 5);
	assert_eq!(hit.as_deref(), Some(&42));
	assert_eq!(cache.stats(), CacheStats { entries: 1, bytes: 16 });
}

#[test]
fn test_stale_entry_is_a_miss_and_evicted_on_read() {
	let cache = single_shard(1024);
	cache.insert(key(0, 5, "sdf"), Arc::new(42u32), 16);

	assert!(cache.get::<u32>(&key(0, 5, "sdf"), 6).is_none());
	assert!(!cache.contains(&key(0, 5, "sdf")));
	assert_eq!(cache.stats(), CacheStats::default());
}

#[test]
fn test_wrong_type_is_a_miss() {
	let cache = single_shard(1024);
	cache.insert(key(0, 1, "sdf"), Arc::new(42u32), 16);
	assert!(cache.get::<String>(&key(0, 1, "sdf"), 1).is_none());
}

#[test]
fn test_evicts_least_recently_accessed_over_budget() {
	let cache = single_shard(100);
	cache.insert(key(0, 1, "p"), Arc::new(0u8), 40);
	cache.insert(key(1, 1, "p"), Arc::new(1u8), 40);

	// Touch chunk 0 so chunk 1 becomes the eviction candidate.
	assert!(cache.get::<u8>(&key(0, 1, "p"), 1).is_some());

	cache.insert(key(2, 1, "p"), Arc::new(2u8), 40);

	assert!(cache.contains(&key(0, 1, "p")));
	assert!(!cache.contains(&key(1, 1, "p")));
	assert!(cache.contains(&key(2, 1, "p")));
	assert_eq!(cache.stats(), CacheStats { entries: 2, bytes: 80 });
	assert_eq!(cache.metrics.snapshot().cache_evictions, 1);
}

#[test]
fn test_oversized_artifact_is_not_cached() {
	let cache = single_shard(10);
	cache.insert(key(0, 1, "p"), Arc::new(0u8), 11);
	assert!(!cache.contains(&key(0, 1, "p")));
}

#[test]
fn test_zero_budget_disables_cache() {
	let cache = single_shard(0);
	assert!(!cache.is_enabled());
	cache.insert(key(0, 1, "p"), Arc::new(0u8), 1);
	assert!(cache.get::<u8>(&key(0, 1, "p"), 1).is_none());
}

#[test]
fn test_reinsert_replaces_entry_bytes() {
	let cache = single_shard(1024);
	cache.insert(key(0, 1, "p"), Arc::new(0u8), 10);
	cache.insert(key(0, 1, "p"), Arc::new(1u8), 30);

	assert_eq!(cache.stats(), CacheStats { entries: 1, bytes: 30 });
	assert_eq!(cache.get::<u8>(&key(0, 1, "p"), 1).as_deref(), Some(&1));
}

#[test]
fn test_evict_stale_only_touches_one_chunk() {
	let cache = ArtifactCache::new(4096, 4, Arc::new(ChunkWorkMetrics::new()));
	cache.insert(key(0, 1, "a"), Arc::new(0u8), 8);
	cache.insert(key(0, 1, "b"), Arc::new(0u8), 8);
	cache.insert(key(0, 2, "a"), Arc::new(0u8), 8);
	cache.insert(key(1, 1, "a"), Arc::new(0u8), 8);

	let removed = cache.evict_stale(chunk(0), 2);
	assert_eq!(removed, 2);
	assert!(cache.contains(&key(0, 2, "a")));
	assert!(cache.contains(&key(1, 1, "a")));
	assert_eq!(cache.stats().entries, 2);
}

#[test]
fn test_budget_covers_whole_cache_not_one_shard() {
	let cache = sharded(1000);
	cache.insert(key(0, 1, "p"), Arc::new(0u8), 100);
	assert_eq!(cache.get::<u8>(&key(0, 1, "p"), 1).as_deref(), Some(&0));

	// Same chunk, same shard: still far under the total budget.
	cache.insert(key(1, 1, "a"), Arc::new(1u8), 50);
	cache.insert(key(1, 1, "b"), Arc::new(2u8), 50);
	assert!(cache.contains(&key(1, 1, "a")));
	assert!(cache.contains(&key(1, 1, "b")));
	assert_eq!(cache.stats(), CacheStats { entries: 3, bytes: 200 });
	assert_eq!(cache.metrics.snapshot().cache_evictions, 0);
}

#[test]
fn test_artifact_up_to_full_budget_is_cached() {
	let cache = sharded(1000);
	cache.insert(key(0, 1, "p"), Arc::new(0u8), 1000);
	assert!(cache.contains(&key(0, 1, "p")));

	cache.insert(key(1, 1, "p"), Arc::new(1u8), 1001);
	assert!(!cache.contains(&key(1, 1, "p")));
	assert!(cache.contains(&key(0, 1, "p")));
}

#[test]
fn test_eviction_picks_oldest_entry_across_shards() {
	let cache = sharded(100);
	for x in 0..4 {
		cache.insert(key(x, 1, "p"), Arc::new(x as u8), 25);
	}
	assert_eq!(cache.stats().bytes, 100);

	// Touch everything but chunk 2.
	for x in [0, 1, 3] {
		assert!(cache.get::<u8>(&key(x, 1, "p"), 1).is_some());
	}

	cache.insert(key(4, 1, "p"), Arc::new(4u8), 25);

	assert!(!cache.contains(&key(2, 1, "p")));
	for x in [0, 1, 3, 4] {
		assert!(cache.contains(&key(x, 1, "p")), "chunk {x} evicted");
	}
	assert_eq!(cache.stats(), CacheStats { entries: 4, bytes: 100 });
	assert_eq!(cache.metrics.snapshot().cache_evictions, 1);
}

#[test]
fn test_large_insert_evicts_until_under_budget() {
	let cache = sharded(100);
	for x in 0..5 {
		cache.insert(key(x, 1, "p"), Arc::new(0u8), 20);
	}

	cache.insert(key(9, 1, "p"), Arc::new(0u8), 70);

	// 170 bytes: the four oldest go, leaving 90.
	for x in 0..4 {
		assert!(!cache.contains(&key(x, 1, "p")));
	}
	assert!(cache.contains(&key(4, 1, "p")));
	assert!(cache.contains(&key(9, 1, "p")));
	assert_eq!(cache.stats(), CacheStats { entries: 2, bytes: 90 });
	assert_eq!(cache.metrics.snapshot().cache_evictions, 4);
}
