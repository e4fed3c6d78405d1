//! Pluggable `Snapshot -> Artifact` functions.

use crate::cancel::CancelCheck;
use crate::error::ProcessError;
use crate::key::ProcessorId;
use crate::snapshot::ChunkSnapshot;

/// Derives an artifact from an immutable chunk snapshot.
///
/// Runs entirely on a worker thread. Implementations must be pure with
/// respect to the snapshot (no reads of live chunk state), and should poll
/// `cancel` often enough to stop promptly. Panics are caught by the worker
/// and reported as `Failed`.
pub trait ChunkProcessor: Send + Sync + 'static {
	type Artifact: Send + Sync + 'static;

	/// Stable, low-cardinality id used for caching and metrics.
	fn id(&self) -> ProcessorId;

	fn process(&self, snapshot: &ChunkSnapshot, cancel: &CancelCheck<'_>) -> Result<Self::Artifact, ProcessError>;

	/// Size estimate charged against the cache budget. `None` falls back to
	/// the configured default.
	fn estimated_bytes(&self, _artifact: &Self::Artifact) -> Option<usize> {
		None
	}
}
