//! In-memory recording backend
//!
//! [`RecordingBackend`] implements every framework collaborator trait against
//! a tiny in-memory store, and records each call as a [`BackendEvent`]. It
//! behaves like a real database where the fixtures can observe the difference:
//!
//! - every data access consults the attached [`DbBlocker`],
//! - rows live in per-table maps with an auto-increment counter starting at 1,
//! - rolling back an atomic block restores rows but never rewinds counters,
//!   exactly like database sequences,
//! - on-commit callbacks queue while an atomic block is open and run
//!   immediately otherwise.
//!
//! Setup and teardown can be made to fail to exercise error paths.
//!
//! ```
//! use reinhardt_testdb::mock::RecordingBackend;
//!
//! let backend = RecordingBackend::new();
//! assert!(backend.insert("default", "polls_question", "What's new?").is_err());
//!
//! backend.blocker().unblock();
//! assert_eq!(backend.insert("default", "polls_question", "What's new?").unwrap(), 1);
//! assert_eq!(backend.insert("default", "polls_question", "Why?").unwrap(), 2);
//! ```

use crate::backend::{
	AtomicBlock, CapturedQuery, CommitHooks, CreatedDatabase, DatabaseCreation, OnCommitCallback,
	QueryLog, SessionDbHandle, SetupDatabasesArgs, TransactionControl,
};
use crate::blocker::DbBlocker;
use crate::error::{FixtureError, FixtureResult};
use crate::settings::{DEFAULT_DB_ALIAS, ProjectSettings};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rstest::fixture;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A collaborator call seen by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
	SetupDatabases {
		verbosity: u8,
		keepdb: bool,
		migrate_verbosity: u8,
		migrations_disabled: bool,
		test_names: Vec<String>,
	},
	TeardownDatabases {
		test_names: Vec<String>,
	},
	BeginAtomic {
		alias: String,
		depth: usize,
	},
	RollbackAtomic {
		alias: String,
		depth: usize,
	},
	Flush {
		alias: String,
		reset_sequences: bool,
	},
	ResetSequences {
		alias: String,
	},
	CloseConnection {
		alias: String,
	},
}

#[derive(Debug, Clone, Default)]
struct Table {
	rows: BTreeMap<i64, String>,
	next_id: i64,
}

impl Table {
	fn new() -> Self {
		Self {
			rows: BTreeMap::new(),
			next_id: 1,
		}
	}
}

#[derive(Debug, Clone)]
struct Snapshot {
	rows: BTreeMap<String, BTreeMap<i64, String>>,
	on_commit_len: usize,
}

#[derive(Default)]
struct MemoryDatabase {
	test_name: Option<String>,
	tables: BTreeMap<String, Table>,
	atomics: Vec<Snapshot>,
	queries: Vec<CapturedQuery>,
	force_logging: bool,
	on_commit: Vec<OnCommitCallback>,
}

impl MemoryDatabase {
	fn log(&mut self, sql: String) {
		if self.force_logging {
			self.queries.push(CapturedQuery {
				sql,
				duration: Duration::ZERO,
			});
		}
	}

	fn snapshot(&self) -> Snapshot {
		Snapshot {
			rows: self
				.tables
				.iter()
				.map(|(name, table)| (name.clone(), table.rows.clone()))
				.collect(),
			on_commit_len: self.on_commit.len(),
		}
	}

	fn restore(&mut self, snapshot: Snapshot) {
		for (name, table) in self.tables.iter_mut() {
			table.rows = snapshot.rows.get(name).cloned().unwrap_or_default();
		}
		self.on_commit.truncate(snapshot.on_commit_len);
	}
}

#[derive(Default)]
struct State {
	events: Vec<BackendEvent>,
	databases: IndexMap<String, MemoryDatabase>,
	no_transactions: HashSet<String>,
	fail_setup: Option<String>,
	fail_teardown: Option<String>,
}

impl State {
	fn database(&mut self, alias: &str) -> &mut MemoryDatabase {
		self.databases.entry(alias.to_string()).or_default()
	}
}

/// In-memory backend that records every collaborator call
pub struct RecordingBackend {
	blocker: Mutex<Arc<DbBlocker>>,
	state: Mutex<State>,
}

impl RecordingBackend {
	/// A backend guarded by its own blocked gate until a session attaches one
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			blocker: Mutex::new(DbBlocker::new()),
			state: Mutex::new(State::default()),
		})
	}

	/// The gate currently guarding data access
	pub fn blocker(&self) -> Arc<DbBlocker> {
		Arc::clone(&self.blocker.lock())
	}

	/// Every call recorded so far, oldest first
	pub fn events(&self) -> Vec<BackendEvent> {
		self.state.lock().events.clone()
	}

	pub fn clear_events(&self) {
		self.state.lock().events.clear();
	}

	/// Make the next `setup_databases` call fail with `message`
	pub fn fail_setup(&self, message: impl Into<String>) {
		self.state.lock().fail_setup = Some(message.into());
	}

	/// Make `teardown_databases` fail with `message`
	pub fn fail_teardown(&self, message: impl Into<String>) {
		self.state.lock().fail_teardown = Some(message.into());
	}

	/// Declare whether `alias` can roll back transactions
	pub fn set_supports_transactions(&self, alias: &str, supported: bool) {
		let mut state = self.state.lock();
		if supported {
			state.no_transactions.remove(alias);
		} else {
			state.no_transactions.insert(alias.to_string());
		}
	}

	/// Name the test database for `alias` was created under
	pub fn test_database_name(&self, alias: &str) -> Option<String> {
		self.state
			.lock()
			.databases
			.get(alias)
			.and_then(|db| db.test_name.clone())
	}

	fn check_access(&self, operation: &str) -> FixtureResult<()> {
		self.blocker().check_access(operation)
	}

	/// Insert a row and return its generated id
	pub fn insert(&self, alias: &str, table: &str, value: impl Into<String>) -> FixtureResult<i64> {
		let sql = format!("INSERT INTO {}", table);
		self.check_access(&sql)?;

		let mut state = self.state.lock();
		let db = state.database(alias);
		db.log(sql);
		let table = db.tables.entry(table.to_string()).or_insert_with(Table::new);
		let id = table.next_id;
		table.next_id += 1;
		table.rows.insert(id, value.into());
		Ok(id)
	}

	/// Every row of `table`, ordered by id
	pub fn select(&self, alias: &str, table: &str) -> FixtureResult<Vec<(i64, String)>> {
		let sql = format!("SELECT * FROM {}", table);
		self.check_access(&sql)?;

		let mut state = self.state.lock();
		let db = state.database(alias);
		db.log(sql);
		Ok(db
			.tables
			.get(table)
			.map(|t| t.rows.iter().map(|(id, v)| (*id, v.clone())).collect())
			.unwrap_or_default())
	}

	/// Run a statement that only shows up in the query log
	pub fn execute(&self, alias: &str, sql: &str) -> FixtureResult<()> {
		self.check_access(sql)?;
		self.state.lock().database(alias).log(sql.to_string());
		Ok(())
	}

	/// Row count of `table`, read without going through the gate
	pub fn row_count(&self, alias: &str, table: &str) -> usize {
		self.state
			.lock()
			.databases
			.get(alias)
			.and_then(|db| db.tables.get(table))
			.map_or(0, |t| t.rows.len())
	}

	/// Queue `callback` for the commit of the open transaction
	///
	/// Outside of any atomic block the callback runs immediately.
	pub fn on_commit(&self, alias: &str, callback: OnCommitCallback) {
		let run_now = {
			let mut state = self.state.lock();
			let db = state.database(alias);
			if db.atomics.is_empty() {
				Some(callback)
			} else {
				db.on_commit.push(callback);
				None
			}
		};
		if let Some(callback) = run_now {
			callback.call();
		}
	}
}

impl Default for RecordingBackend {
	fn default() -> Self {
		Self {
			blocker: Mutex::new(DbBlocker::new()),
			state: Mutex::new(State::default()),
		}
	}
}

impl fmt::Debug for RecordingBackend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("RecordingBackend")
			.field("databases", &state.databases.keys().collect::<Vec<_>>())
			.field("events", &state.events.len())
			.finish_non_exhaustive()
	}
}

impl DatabaseCreation for RecordingBackend {
	fn setup_databases(
		&self,
		settings: &ProjectSettings,
		args: &SetupDatabasesArgs,
	) -> FixtureResult<SessionDbHandle> {
		self.check_access("CREATE DATABASE")?;

		let mut state = self.state.lock();
		let mut handle = SessionDbHandle::default();
		for (alias, config) in &settings.databases {
			let test_name = config.test_database_name();
			let db = state.database(alias);
			let reused = args.keepdb && db.test_name.as_deref() == Some(test_name.as_str());
			if !reused {
				db.tables.clear();
				db.test_name = Some(test_name.clone());
			}
			handle.databases.push(CreatedDatabase {
				alias: alias.clone(),
				original_name: config.name.clone(),
				test_name,
				destroy: !args.keepdb,
			});
		}

		state.events.push(BackendEvent::SetupDatabases {
			verbosity: args.verbosity,
			keepdb: args.keepdb,
			migrate_verbosity: args.migrate_verbosity,
			migrations_disabled: settings.migration_modules.is_disabled(),
			test_names: handle.databases.iter().map(|d| d.test_name.clone()).collect(),
		});

		if let Some(message) = state.fail_setup.take() {
			return Err(FixtureError::Setup(message));
		}
		Ok(handle)
	}

	fn teardown_databases(&self, handle: &SessionDbHandle, _verbosity: u8) -> FixtureResult<()> {
		self.check_access("DROP DATABASE")?;

		let mut state = self.state.lock();
		state.events.push(BackendEvent::TeardownDatabases {
			test_names: handle.databases.iter().map(|d| d.test_name.clone()).collect(),
		});
		if let Some(message) = state.fail_teardown.clone() {
			let alias = handle
				.databases
				.first()
				.map_or(DEFAULT_DB_ALIAS, |d| d.alias.as_str());
			return Err(FixtureError::database(alias, message));
		}
		for created in handle.databases.iter().filter(|d| d.destroy) {
			state.databases.shift_remove(&created.alias);
		}
		Ok(())
	}

	fn attach_blocker(&self, blocker: Arc<DbBlocker>) {
		*self.blocker.lock() = blocker;
	}
}

impl TransactionControl for RecordingBackend {
	fn supports_transactions(&self, alias: &str) -> bool {
		!self.state.lock().no_transactions.contains(alias)
	}

	fn begin_atomic(&self, alias: &str) -> FixtureResult<AtomicBlock> {
		self.check_access("BEGIN")?;

		let mut state = self.state.lock();
		let db = state.database(alias);
		let snapshot = db.snapshot();
		db.atomics.push(snapshot);
		let depth = db.atomics.len();
		state.events.push(BackendEvent::BeginAtomic {
			alias: alias.to_string(),
			depth,
		});
		Ok(AtomicBlock {
			alias: alias.to_string(),
			depth,
			savepoint: (depth > 1).then(|| format!("s{}", depth)),
		})
	}

	fn rollback_atomic(&self, block: &AtomicBlock) -> FixtureResult<()> {
		self.check_access("ROLLBACK")?;

		let mut state = self.state.lock();
		let db = state.database(&block.alias);
		if db.atomics.len() != block.depth {
			return Err(FixtureError::database(
				&block.alias,
				format!(
					"cannot roll back block at depth {} while {} blocks are open",
					block.depth,
					db.atomics.len()
				),
			));
		}
		if let Some(snapshot) = db.atomics.pop() {
			db.restore(snapshot);
		}
		state.events.push(BackendEvent::RollbackAtomic {
			alias: block.alias.clone(),
			depth: block.depth,
		});
		Ok(())
	}

	fn flush(&self, alias: &str, reset_sequences: bool) -> FixtureResult<()> {
		self.check_access("FLUSH")?;

		let mut state = self.state.lock();
		let db = state.database(alias);
		for table in db.tables.values_mut() {
			table.rows.clear();
			if reset_sequences {
				table.next_id = 1;
			}
		}
		state.events.push(BackendEvent::Flush {
			alias: alias.to_string(),
			reset_sequences,
		});
		Ok(())
	}

	fn reset_sequences(&self, alias: &str) -> FixtureResult<()> {
		self.check_access("RESET SEQUENCES")?;

		let mut state = self.state.lock();
		for table in state.database(alias).tables.values_mut() {
			table.next_id = 1;
		}
		state.events.push(BackendEvent::ResetSequences {
			alias: alias.to_string(),
		});
		Ok(())
	}

	fn close_connection(&self, alias: &str) -> FixtureResult<()> {
		self.state.lock().events.push(BackendEvent::CloseConnection {
			alias: alias.to_string(),
		});
		Ok(())
	}
}

impl QueryLog for RecordingBackend {
	fn captured_queries(&self, alias: &str) -> Vec<CapturedQuery> {
		self.state
			.lock()
			.databases
			.get(alias)
			.map(|db| db.queries.clone())
			.unwrap_or_default()
	}

	fn force_query_logging(&self, alias: &str, enabled: bool) -> bool {
		let mut state = self.state.lock();
		let db = state.database(alias);
		std::mem::replace(&mut db.force_logging, enabled)
	}
}

impl CommitHooks for RecordingBackend {
	fn pending_on_commit(&self, alias: &str) -> Vec<OnCommitCallback> {
		self.state
			.lock()
			.databases
			.get(alias)
			.map(|db| db.on_commit.clone())
			.unwrap_or_default()
	}
}

/// A fresh [`RecordingBackend`]
#[fixture]
pub fn recording_backend() -> Arc<RecordingBackend> {
	crate::logging::init_test_logging();
	RecordingBackend::new()
}
