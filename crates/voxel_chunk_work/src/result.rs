//! Request options and the result type every request resolves to.

use std::fmt;
use std::sync::Arc;

use crate::error::ChunkWorkError;
use crate::key::{ArtifactKey, ChunkKey, ChunkVersion, ProcessorId};

/// Terminal state of a request. Nothing is retried automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkWorkStatus {
	/// The artifact was computed (or served from cache) and is current.
	Success,
	/// A newer version was requested or became live. Expected under churn.
	Superseded,
	/// The caller's token was triggered, or the service shut down.
	Canceled,
	/// The snapshot source or the processor failed.
	Failed,
	/// The snapshot source could not produce data for the chunk.
	ChunkUnavailable,
	/// Refused at admission by a bounded queue.
	Rejected,
}

impl ChunkWorkStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Success => "success",
			Self::Superseded => "superseded",
			Self::Canceled => "canceled",
			Self::Failed => "failed",
			Self::ChunkUnavailable => "chunk_unavailable",
			Self::Rejected => "rejected",
		}
	}
}

impl fmt::Display for ChunkWorkStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

// =============================================================================
// Priority
// =============================================================================

/// Admission band. Higher bands are drained to exhaustion first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
	High,
	Normal,
	Low,
}

impl Priority {
	/// All bands, highest first.
	pub const BANDS: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

	/// `> 0` is High, `0` is Normal, `< 0` is Low.
	pub fn from_level(level: i32) -> Self {
		match level {
			l if l > 0 => Self::High,
			0 => Self::Normal,
			_ => Self::Low,
		}
	}

	#[inline]
	pub(crate) fn band(self) -> usize {
		self as usize
	}
}

/// Per-request options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkWorkOptions {
	/// Priority level; see [`Priority::from_level`].
	pub priority: i32,
}

impl ChunkWorkOptions {
	pub const HIGH: Self = Self { priority: 1 };
	pub const NORMAL: Self = Self { priority: 0 };
	pub const LOW: Self = Self { priority: -1 };

	pub fn with_priority(priority: i32) -> Self {
		Self { priority }
	}

	pub fn band(&self) -> Priority {
		Priority::from_level(self.priority)
	}
}

// =============================================================================
// ChunkWorkResult
// =============================================================================

/// Outcome of one request.
pub struct ChunkWorkResult<A> {
	pub status: ChunkWorkStatus,
	pub key: ChunkKey,
	pub requested_version: ChunkVersion,
	pub processor_id: ProcessorId,
	/// Present only for `Success`.
	pub artifact: Option<Arc<A>>,
	/// Present only for `Failed`.
	pub error: Option<ChunkWorkError>,
	/// Short human-readable detail for non-success outcomes.
	pub reason: Option<String>,
	/// The artifact was served from the cache without queueing.
	pub from_cache: bool,
}

impl<A> ChunkWorkResult<A> {
	fn with_status(status: ChunkWorkStatus, key: &ArtifactKey) -> Self {
		Self {
			status,
			key: key.key,
			requested_version: key.version,
			processor_id: key.processor.clone(),
			artifact: None,
			error: None,
			reason: None,
			from_cache: false,
		}
	}

	pub(crate) fn success(key: &ArtifactKey, artifact: Arc<A>) -> Self {
		Self {
			artifact: Some(artifact),
			..Self::with_status(ChunkWorkStatus::Success, key)
		}
	}

	pub(crate) fn cached(key: &ArtifactKey, artifact: Arc<A>) -> Self {
		Self {
			from_cache: true,
			..Self::success(key, artifact)
		}
	}

	pub(crate) fn terminal(status: ChunkWorkStatus, key: &ArtifactKey, reason: impl Into<String>) -> Self {
		Self {
			reason: Some(reason.into()),
			..Self::with_status(status, key)
		}
	}

	pub(crate) fn failed(key: &ArtifactKey, error: ChunkWorkError, reason: impl Into<String>) -> Self {
		Self {
			error: Some(error),
			..Self::terminal(ChunkWorkStatus::Failed, key, reason)
		}
	}

	pub fn is_success(&self) -> bool {
		self.status == ChunkWorkStatus::Success
	}

	pub fn artifact(&self) -> Option<&A> {
		self.artifact.as_deref()
	}

	pub fn artifact_key(&self) -> ArtifactKey {
		ArtifactKey::new(self.key, self.requested_version, self.processor_id.clone())
	}
}

impl<A> Clone for ChunkWorkResult<A> {
	fn clone(&self) -> Self {
		Self {
			status: self.status,
			key: self.key,
			requested_version: self.requested_version,
			processor_id: self.processor_id.clone(),
			artifact: self.artifact.clone(),
			error: self.error,
			reason: self.reason.clone(),
			from_cache: self.from_cache,
		}
	}
}

impl<A> fmt::Debug for ChunkWorkResult<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChunkWorkResult")
			.field("status", &self.status)
			.field("key", &self.key)
			.field("requested_version", &self.requested_version)
			.field("processor_id", &self.processor_id)
			.field("has_artifact", &self.artifact.is_some())
			.field("error", &self.error)
			.field("reason", &self.reason)
			.field("from_cache", &self.from_cache)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use glam::IVec3;

	use super::*;
	use crate::key::WorldId;

	fn artifact_key() -> ArtifactKey {
		let chunk = ChunkKey::new(WorldId::from_raw(1), IVec3::ONE);
		ArtifactKey::new(chunk, 3, ProcessorId::new("sdf"))
	}

	#[test]
	fn test_priority_bands() {
		assert_eq!(Priority::from_level(5), Priority::High);
		assert_eq!(Priority::from_level(0), Priority::Normal);
		assert_eq!(Priority::from_level(-2), Priority::Low);
		assert_eq!(ChunkWorkOptions::default().band(), Priority::Normal);
		assert_eq!(Priority::High.band(), 0);
		assert_eq!(Priority::Low.band(), 2);
	}

	#[test]
	fn test_result_constructors() {
		let key = artifact_key();

		let ok = ChunkWorkResult::success(&key, Arc::new(7u32));
		assert!(ok.is_success());
		assert_eq!(ok.artifact(), Some(&7));
		assert!(!ok.from_cache);
		assert_eq!(ok.artifact_key(), key);

		let cached = ChunkWorkResult::cached(&key, Arc::new(7u32));
		assert!(cached.from_cache);

		let failed = ChunkWorkResult::<u32>::failed(&key, ChunkWorkError::ProcessorFailed, "boom");
		assert_eq!(failed.status, ChunkWorkStatus::Failed);
		assert_eq!(failed.error, Some(ChunkWorkError::ProcessorFailed));
		assert_eq!(failed.reason.as_deref(), Some("boom"));
		assert!(failed.artifact().is_none());
	}

	#[test]
	fn test_clone_shares_artifact() {
		let key = artifact_key();
		let ok = ChunkWorkResult::success(&key, Arc::new(vec![1u8, 2, 3]));
		let copy = ok.clone();
		assert!(Arc::ptr_eq(
			ok.artifact.as_ref().unwrap(),
			copy.artifact.as_ref().unwrap()
		));
	}
}
