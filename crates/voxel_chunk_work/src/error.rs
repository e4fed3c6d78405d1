//! Error types.
//!
//! Only service construction is fallible. Everything that can go wrong while
//! serving a request is reported as data through [`ChunkWorkResult`].
//!
//! [`ChunkWorkResult`]: crate::result::ChunkWorkResult

use thiserror::Error;

/// Error returned by a [`ChunkProcessor`](crate::processor::ChunkProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
	/// The processor observed cancellation and stopped early.
	#[error("processing canceled")]
	Canceled,
	/// The processor could not produce an artifact.
	#[error("{0}")]
	Failed(String),
}

impl ProcessError {
	pub fn failed(reason: impl Into<String>) -> Self {
		Self::Failed(reason.into())
	}
}

/// Low-detail error code carried by a failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ChunkWorkError {
	#[error("snapshot creation failed")]
	SnapshotFailed,
	#[error("processor failed")]
	ProcessorFailed,
	#[error("unknown failure")]
	Unknown,
}

/// Invalid [`ChunkWorkConfig`](crate::config::ChunkWorkConfig) value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("worker_count must be at least 1")]
	ZeroWorkers,
	#[error("shard_count must be at least 1")]
	ZeroShards,
	#[error("max_queue_depth must be at least 1 when set")]
	ZeroQueueDepth,
	#[error("thread_name_prefix must not be empty")]
	EmptyThreadPrefix,
}

/// Failure to construct a [`ChunkWorkService`](crate::service::ChunkWorkService).
#[derive(Debug, Error)]
pub enum ServiceError {
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),
	#[error("failed to build worker pool: {0}")]
	ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"panic with non-string payload".to_string()
	}
}
