//! Chunk identity and the composite keys built from it.
//!
//! The core never mints chunk keys or versions; both are supplied by the
//! owner of live chunk data. Versions are only ever compared.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::IVec3;

// =============================================================================
// WorldId - unique identifier
// =============================================================================

/// Atomic counter for generating unique WorldIds.
static WORLD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque world identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct WorldId(u64);

impl WorldId {
	/// Generate a new unique WorldId.
	pub fn new() -> Self {
		Self(WORLD_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
	}

	/// Wrap an id minted by the surrounding system.
	pub const fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	/// Get the raw ID value.
	pub fn raw(&self) -> u64 {
		self.0
	}
}

impl Default for WorldId {
	fn default() -> Self {
		Self::new()
	}
}

// =============================================================================
// ChunkKey / ChunkVersion
// =============================================================================

/// Monotonic per-chunk version, bumped by the chunk owner on every mutation.
pub type ChunkVersion = i64;

/// Identifies one chunk: world plus integer chunk coordinates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChunkKey {
	pub world: WorldId,
	pub coords: IVec3,
}

impl ChunkKey {
	pub const fn new(world: WorldId, coords: IVec3) -> Self {
		Self { world, coords }
	}
}

impl fmt::Display for ChunkKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}:({}, {}, {})",
			self.world.0, self.coords.x, self.coords.y, self.coords.z
		)
	}
}

// =============================================================================
// ProcessorId
// =============================================================================

/// Stable, low-cardinality processor identifier.
///
/// Used both as part of the cache key and as a metrics label, so processors
/// with parameters should expose bucketed ids (`"downsample-2x"`) instead of
/// embedding raw values.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(Arc<str>);

impl ProcessorId {
	pub fn new(id: impl AsRef<str>) -> Self {
		Self(Arc::from(id.as_ref()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ProcessorId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl fmt::Debug for ProcessorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ProcessorId({:?})", &*self.0)
	}
}

impl fmt::Display for ProcessorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

// =============================================================================
// Composite keys
// =============================================================================

/// Key of one shared snapshot: a chunk at one version.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SnapshotKey {
	pub key: ChunkKey,
	pub version: ChunkVersion,
}

impl SnapshotKey {
	pub const fn new(key: ChunkKey, version: ChunkVersion) -> Self {
		Self { key, version }
	}
}

/// Key of one cacheable, dedupable unit of work.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArtifactKey {
	pub key: ChunkKey,
	pub version: ChunkVersion,
	pub processor: ProcessorId,
}

impl ArtifactKey {
	pub fn new(key: ChunkKey, version: ChunkVersion, processor: ProcessorId) -> Self {
		Self {
			key,
			version,
			processor,
		}
	}

	pub fn snapshot_key(&self) -> SnapshotKey {
		SnapshotKey::new(self.key, self.version)
	}
}
