//! voxel_chunk_work - Background computation of derived chunk artifacts
//!
//! Runs expensive per-chunk work (SDF generation, downsampling, occupancy
//! summaries, ...) off the owner thread, against immutable snapshots of
//! versioned voxel chunks. The owner thread never blocks and never shares
//! mutable chunk data with workers.
//!
//! ```text
//!  owner thread                         worker pool (rayon, named threads)
//!  ────────────                         ──────────────────────────────────
//!  request(key, v, P) ──► cache hit? ──► resolved handle
//!          │
//!          ▼
//!   dedup / supersede ──► JobQueue ──► worker ──► SnapshotRegistry ──► P::process
//!          │              (High,                   (one snapshot per       │
//!          ▼               Normal,                  chunk version)         ▼
//!   ChunkWorkHandle ◄──── Low) ◄──────────── publish guard ──► ArtifactCache
//! ```
//!
//! # Features
//!
//! - **Snapshot leases**: at most one snapshot per `(chunk, version)`, shared
//!   by every processor and returned to a buffer pool on last release
//! - **Supersede**: queued work for an old version is dropped the moment a
//!   newer version is requested, before it ever takes a snapshot
//! - **Publish guard**: an artifact is only cached and reported as success
//!   if its version is still live when processing ends
//! - **Artifact cache**: byte-budgeted, version-aware, LRU eviction
//! - **Metrics**: counters, gauges and rolling timing windows
//!
//! # Example
//!
//! ```ignore
//! use voxel_chunk_work::{ChunkWorkConfig, ChunkWorkOptions, ChunkWorkService, CancellationToken};
//! use voxel_chunk_work::processors::OccupancyProcessor;
//!
//! let service = ChunkWorkService::new(ChunkWorkConfig::default(), versions, source)?;
//! let occupancy = Arc::new(OccupancyProcessor);
//!
//! let mut handle = service.request(key, version, &occupancy, ChunkWorkOptions::HIGH, CancellationToken::new());
//! // ...
//! if let Some(result) = handle.poll() {
//!     println!("{}: {:?}", result.status, result.artifact());
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod processor;
pub mod processors;
pub mod result;
pub(crate) mod scheduler;
pub mod service;
pub(crate) mod sharded;
pub mod snapshot;
pub mod source;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used items
pub use cache::{ArtifactCache, CacheStats};
pub use cancel::{CancelCheck, CancellationToken};
pub use config::ChunkWorkConfig;
pub use error::{ChunkWorkError, ConfigError, ProcessError, ServiceError};
pub use key::{ArtifactKey, ChunkKey, ChunkVersion, ProcessorId, SnapshotKey, WorldId};
pub use metrics::{ChunkWorkMetrics, MetricsSnapshot};
pub use processor::ChunkProcessor;
pub use result::{ChunkWorkOptions, ChunkWorkResult, ChunkWorkStatus, Priority};
pub use scheduler::ChunkWorkHandle;
pub use service::ChunkWorkService;
pub use snapshot::{ChunkSnapshot, SnapshotDims, SnapshotPool, Voxel};
pub use source::{ChunkSnapshotSource, ChunkVersionProvider};
