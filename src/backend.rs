//! Framework primitives the fixtures drive
//!
//! The fixtures never talk to a database themselves. They decide when to call
//! the framework's creation, transaction, query-log and on-commit primitives
//! and with which options. Each concern is its own trait; a framework
//! integration implements all of them and gets [`TestDatabaseBackend`] for
//! free.

use crate::blocker::DbBlocker;
use crate::error::FixtureResult;
use crate::settings::ProjectSettings;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Options passed to [`DatabaseCreation::setup_databases`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupDatabasesArgs {
	/// Verbosity requested for the run
	pub verbosity: u8,
	/// Whether the framework may prompt; always `false` under the fixtures
	pub interactive: bool,
	/// Reuse existing test databases instead of recreating them
	pub keepdb: bool,
	/// Verbosity for the migrate step, forced to 0 when migrations are disabled
	pub migrate_verbosity: u8,
}

/// One test database created for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDatabase {
	pub alias: String,
	/// Name of the real database the test database shadows
	pub original_name: String,
	/// Name the test database was created under
	pub test_name: String,
	/// Whether teardown should destroy it; false when it was reused
	pub destroy: bool,
}

/// Result of session database creation, consumed by teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDbHandle {
	pub databases: Vec<CreatedDatabase>,
}

/// Creating and destroying the session's test databases
pub trait DatabaseCreation: Send + Sync {
	fn setup_databases(
		&self,
		settings: &ProjectSettings,
		args: &SetupDatabasesArgs,
	) -> FixtureResult<SessionDbHandle>;

	fn teardown_databases(&self, handle: &SessionDbHandle, verbosity: u8) -> FixtureResult<()>;

	/// Give connection code access to the gate
	///
	/// Called once when the session is built. Connection code should call
	/// [`DbBlocker::check_access`] before opening a connection.
	fn attach_blocker(&self, _blocker: Arc<DbBlocker>) {}
}

/// An open atomic block (transaction or savepoint) on one database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicBlock {
	pub alias: String,
	/// Nesting depth; 1 is the outermost transaction
	pub depth: usize,
	/// Savepoint name for nested blocks
	pub savepoint: Option<String>,
}

/// Transaction primitives used by the isolation strategies
pub trait TransactionControl: Send + Sync {
	/// Whether the database can roll back DDL and DML inside a transaction
	fn supports_transactions(&self, _alias: &str) -> bool {
		true
	}

	fn begin_atomic(&self, alias: &str) -> FixtureResult<AtomicBlock>;

	fn rollback_atomic(&self, block: &AtomicBlock) -> FixtureResult<()>;

	/// Delete every row; `reset_sequences` also rewinds auto-increment counters
	fn flush(&self, alias: &str, reset_sequences: bool) -> FixtureResult<()>;

	/// Rewind auto-increment counters back to their starting value
	fn reset_sequences(&self, alias: &str) -> FixtureResult<()>;

	fn close_connection(&self, _alias: &str) -> FixtureResult<()> {
		Ok(())
	}
}

/// A statement seen by the query log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedQuery {
	pub sql: String,
	pub duration: Duration,
}

/// Access to the statements executed on a connection
pub trait QueryLog: Send + Sync {
	/// Every statement logged on `alias` so far, oldest first
	fn captured_queries(&self, alias: &str) -> Vec<CapturedQuery>;

	/// Force query logging on or off, returning the previous setting
	fn force_query_logging(&self, alias: &str, enabled: bool) -> bool;
}

/// Callback registered to run when the surrounding transaction commits
#[derive(Clone)]
pub struct OnCommitCallback {
	name: String,
	func: Arc<dyn Fn() + Send + Sync>,
}

impl OnCommitCallback {
	pub fn new(name: impl Into<String>, func: impl Fn() + Send + Sync + 'static) -> Self {
		Self {
			name: name.into(),
			func: Arc::new(func),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn call(&self) {
		(self.func)()
	}
}

impl fmt::Debug for OnCommitCallback {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OnCommitCallback")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}

/// The list of callbacks waiting for a commit on each connection
pub trait CommitHooks: Send + Sync {
	/// Callbacks queued on `alias`, oldest first
	fn pending_on_commit(&self, alias: &str) -> Vec<OnCommitCallback>;
}

/// Everything the fixtures need from the framework
pub trait TestDatabaseBackend: DatabaseCreation + TransactionControl + QueryLog + CommitHooks {}

impl<T> TestDatabaseBackend for T where T: DatabaseCreation + TransactionControl + QueryLog + CommitHooks
{}
