//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a shared flag: callers hand one to
//! [`ChunkWorkService::request`](crate::service::ChunkWorkService::request),
//! and the scheduler keeps a second, per-chunk token for every running job
//! so that work on a chunk version that has since been replaced can be
//! stopped early. Processors see both through a [`CancelCheck`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ProcessError;

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Requests cancellation. Idempotent.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Release);
	}

	/// Returns true when cancellation was requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}
}

/// Where the caller-side cancellation signal comes from.
#[derive(Clone, Copy)]
enum CallerSignal<'a> {
	Never,
	Token(&'a CancellationToken),
	Poll(&'a (dyn Fn() -> bool + Sync)),
}

/// Cancellation view handed to a processor.
///
/// Links the caller's signal with the optional per-chunk token. Processors
/// should call [`check`](Self::check) between units of work:
///
/// ```ignore
/// for z in 0..dims.z {
///     cancel.check()?;
///     // ... process slice z ...
/// }
/// ```
#[derive(Clone, Copy)]
pub struct CancelCheck<'a> {
	caller: CallerSignal<'a>,
	chunk: Option<&'a CancellationToken>,
}

impl<'a> CancelCheck<'a> {
	/// A check that never reports cancellation.
	pub fn never() -> Self {
		Self {
			caller: CallerSignal::Never,
			chunk: None,
		}
	}

	/// A check driven by a single token.
	pub fn from_token(token: &'a CancellationToken) -> Self {
		Self {
			caller: CallerSignal::Token(token),
			chunk: None,
		}
	}

	/// Link a polled caller signal with a per-chunk token.
	pub(crate) fn linked(caller: &'a (dyn Fn() -> bool + Sync), chunk: &'a CancellationToken) -> Self {
		Self {
			caller: CallerSignal::Poll(caller),
			chunk: Some(chunk),
		}
	}

	/// True when the requesting caller(s) cancelled.
	pub fn caller_cancelled(&self) -> bool {
		match self.caller {
			CallerSignal::Never => false,
			CallerSignal::Token(token) => token.is_cancelled(),
			CallerSignal::Poll(poll) => poll(),
		}
	}

	/// True when the chunk's version moved past the version being processed.
	pub fn chunk_cancelled(&self) -> bool {
		self.chunk.is_some_and(CancellationToken::is_cancelled)
	}

	pub fn is_cancelled(&self) -> bool {
		self.caller_cancelled() || self.chunk_cancelled()
	}

	/// `Err(ProcessError::Canceled)` once either signal fired.
	#[inline]
	pub fn check(&self) -> Result<(), ProcessError> {
		if self.is_cancelled() {
			Err(ProcessError::Canceled)
		} else {
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_clones_share_state() {
		let token = CancellationToken::new();
		let clone = token.clone();
		assert!(!clone.is_cancelled());
		token.cancel();
		assert!(clone.is_cancelled());
	}

	#[test]
	fn never_check_is_never_cancelled() {
		let check = CancelCheck::never();
		assert!(!check.is_cancelled());
		assert_eq!(check.check(), Ok(()));
	}

	#[test]
	fn linked_check_reports_both_sources() {
		let chunk = CancellationToken::new();
		let caller_flag = AtomicBool::new(false);
		let poll = || caller_flag.load(Ordering::Relaxed);
		let check = CancelCheck::linked(&poll, &chunk);

		assert!(!check.is_cancelled());

		chunk.cancel();
		assert!(check.chunk_cancelled());
		assert!(!check.caller_cancelled());
		assert_eq!(check.check(), Err(ProcessError::Canceled));

		caller_flag.store(true, Ordering::Relaxed);
		assert!(check.caller_cancelled());
	}
}
