//! Database access gate
//!
//! [`DbBlocker`] forbids database access outside of an explicit unblock window.
//! Session setup, session teardown and every database fixture open the gate
//! and close it again through a finalizer, so a test that touches the database
//! without requesting a database fixture fails loudly instead of leaking state.
//!
//! The gate keeps a stack of states: [`DbBlocker::block`] and
//! [`DbBlocker::unblock`] push, [`DbBlocker::restore`] pops. Nested windows
//! therefore unwind in the order they were opened.
//!
//! ```
//! use reinhardt_testdb::blocker::DbBlocker;
//!
//! let blocker = DbBlocker::new();
//! assert!(blocker.is_blocked());
//!
//! {
//!     let _guard = blocker.unblock_scope();
//!     assert!(!blocker.is_blocked());
//!     assert!(blocker.check_access("SELECT 1").is_ok());
//! }
//!
//! assert!(blocker.is_blocked());
//! assert!(blocker.check_access("SELECT 1").is_err());
//! ```

use crate::error::{FixtureError, FixtureResult};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
	Blocked,
	Unblocked,
}

/// Reentrant gate guarding database access for one test process
#[derive(Debug)]
pub struct DbBlocker {
	current: Mutex<GateState>,
	history: Mutex<Vec<GateState>>,
}

impl DbBlocker {
	/// Create a gate in the blocked state
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			current: Mutex::new(GateState::Blocked),
			history: Mutex::new(Vec::new()),
		})
	}

	/// Whether database access is currently forbidden
	pub fn is_blocked(&self) -> bool {
		*self.current.lock() == GateState::Blocked
	}

	/// Number of pending `restore()` calls
	pub fn depth(&self) -> usize {
		self.history.lock().len()
	}

	/// Allow database access until the matching [`restore`](Self::restore)
	pub fn unblock(&self) {
		self.push(GateState::Unblocked);
	}

	/// Forbid database access until the matching [`restore`](Self::restore)
	pub fn block(&self) {
		self.push(GateState::Blocked);
	}

	/// Return to the state before the most recent `block()` or `unblock()`
	pub fn restore(&self) -> FixtureResult<()> {
		let previous = self
			.history
			.lock()
			.pop()
			.ok_or(FixtureError::BlockerUnderflow)?;
		*self.current.lock() = previous;
		tracing::debug!(blocked = previous == GateState::Blocked, "database blocker restored");
		Ok(())
	}

	/// Unblock for the lifetime of the returned guard
	pub fn unblock_scope(self: &Arc<Self>) -> BlockerGuard {
		self.unblock();
		BlockerGuard {
			blocker: Arc::clone(self),
		}
	}

	/// Block for the lifetime of the returned guard
	pub fn block_scope(self: &Arc<Self>) -> BlockerGuard {
		self.block();
		BlockerGuard {
			blocker: Arc::clone(self),
		}
	}

	/// Fail with [`FixtureError::DatabaseAccessBlocked`] while the gate is closed
	///
	/// Connection code calls this before touching the database.
	pub fn check_access(&self, operation: &str) -> FixtureResult<()> {
		if self.is_blocked() {
			return Err(FixtureError::DatabaseAccessBlocked {
				operation: operation.to_string(),
			});
		}
		Ok(())
	}

	fn push(&self, next: GateState) {
		let mut current = self.current.lock();
		self.history.lock().push(*current);
		*current = next;
		tracing::debug!(blocked = next == GateState::Blocked, "database blocker changed");
	}
}

/// Restores the gate when dropped, including during unwinding
#[must_use = "the gate is restored as soon as the guard is dropped"]
pub struct BlockerGuard {
	blocker: Arc<DbBlocker>,
}

impl Drop for BlockerGuard {
	fn drop(&mut self) {
		if let Err(err) = self.blocker.restore() {
			tracing::warn!(error = %err, "database blocker guard could not restore");
		}
	}
}
