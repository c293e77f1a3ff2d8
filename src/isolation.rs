//! Per-test database isolation levels and their precedence
//!
//! A test asks for database access by declaring one or more of the
//! [`DbFixture`]s. Exactly one [`IsolationLevel`] is applied per test, however
//! many fixtures are declared. The level is computed from the whole declared
//! set before any setup runs:
//!
//! | Declared                                   | Level                    |
//! |--------------------------------------------|--------------------------|
//! | `reset_sequences_db` (with anything)       | `TransactionalResetSeq`  |
//! | `transactional_db`, or a live server       | `Transactional`          |
//! | `db` only                                  | `Plain`                  |
//! | nothing, or a native framework test case   | `NoDb`                   |
//!
//! ```
//! use reinhardt_testdb::isolation::{DbFixture, FixtureSet, IsolationLevel};
//!
//! let mut fixtures = FixtureSet::new();
//! fixtures.declare(DbFixture::Db);
//! assert_eq!(IsolationLevel::resolve(&fixtures, false), IsolationLevel::Plain);
//!
//! fixtures.declare_live_server();
//! assert_eq!(IsolationLevel::resolve(&fixtures, false), IsolationLevel::Transactional);
//!
//! fixtures.declare(DbFixture::ResetSequencesDb);
//! assert_eq!(IsolationLevel::resolve(&fixtures, false), IsolationLevel::TransactionalResetSeq);
//! ```

pub mod strategy;

use crate::error::FixtureResult;
use crate::settings::{DEFAULT_DB_ALIAS, ProjectSettings};
use std::collections::BTreeSet;

/// The database fixtures a test can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DbFixture {
	/// Savepoint-wrapped access, rolled back after the test
	Db,
	/// Real transactions; the database is flushed after the test
	TransactionalDb,
	/// Like `TransactionalDb`, with auto-increment counters reset first
	ResetSequencesDb,
}

impl DbFixture {
	pub fn name(self) -> &'static str {
		match self {
			Self::Db => "db",
			Self::TransactionalDb => "transactional_db",
			Self::ResetSequencesDb => "reset_sequences_db",
		}
	}
}

/// Fixtures declared by one test that influence isolation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureSet {
	db: BTreeSet<DbFixture>,
	live_server: bool,
}

impl FixtureSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Declare a database fixture; returns false if it was already declared
	pub fn declare(&mut self, fixture: DbFixture) -> bool {
		self.db.insert(fixture)
	}

	pub fn declare_live_server(&mut self) {
		self.live_server = true;
	}

	pub fn contains(&self, fixture: DbFixture) -> bool {
		self.db.contains(&fixture)
	}

	pub fn has_live_server(&self) -> bool {
		self.live_server
	}

	/// Declared fixture names, including `live_server`
	pub fn names(&self) -> Vec<&'static str> {
		let mut names: Vec<_> = self.db.iter().map(|f| f.name()).collect();
		if self.live_server {
			names.push("live_server");
		}
		names
	}
}

/// Effective database isolation for one test, ordered by precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsolationLevel {
	NoDb,
	Plain,
	Transactional,
	TransactionalResetSeq,
}

impl IsolationLevel {
	/// Resolve the single level applied to a test
	///
	/// Native framework test cases manage their own isolation and always
	/// resolve to [`IsolationLevel::NoDb`].
	pub fn resolve(fixtures: &FixtureSet, native_test_case: bool) -> Self {
		if native_test_case {
			return Self::NoDb;
		}
		if fixtures.contains(DbFixture::ResetSequencesDb) {
			Self::TransactionalResetSeq
		} else if fixtures.contains(DbFixture::TransactionalDb) || fixtures.has_live_server() {
			Self::Transactional
		} else if fixtures.contains(DbFixture::Db) {
			Self::Plain
		} else {
			Self::NoDb
		}
	}

	pub fn uses_database(self) -> bool {
		self != Self::NoDb
	}

	/// Whether the level is backed by the transactional strategy
	pub fn is_transactional(self) -> bool {
		matches!(self, Self::Transactional | Self::TransactionalResetSeq)
	}

	pub fn reset_sequences(self) -> bool {
		self == Self::TransactionalResetSeq
	}
}

/// Databases a test runs against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Databases {
	/// Only the `default` alias
	#[default]
	Default,
	/// Every configured alias
	All,
	/// An explicit subset
	Only(Vec<String>),
}

impl Databases {
	pub fn only<I, S>(aliases: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::Only(aliases.into_iter().map(Into::into).collect())
	}

	/// Concrete aliases, validated against `settings`
	pub fn resolve(&self, settings: &ProjectSettings) -> FixtureResult<Vec<String>> {
		let aliases = match self {
			Self::Default => vec![DEFAULT_DB_ALIAS.to_string()],
			Self::All => settings.aliases(),
			Self::Only(aliases) => aliases.clone(),
		};
		for alias in &aliases {
			settings.database(alias)?;
		}
		Ok(aliases)
	}
}
