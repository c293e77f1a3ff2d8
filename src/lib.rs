//! # Reinhardt Test Database Fixtures
//!
//! Session-scoped test databases and per-test isolation for Reinhardt
//! projects, driven from `rstest` fixtures.
//!
//! ## Overview
//!
//! The crate does not talk to a database itself. It decides *when* the
//! framework should create, wrap, flush or destroy test databases, and hands
//! those calls to a [`TestDatabaseBackend`] supplied by the framework
//! integration.
//!
//! - **[`TestSession`]**: creates the test databases once, keeps the
//!   [`DbBlocker`] gate and tears everything down at the end of the run
//! - **[`TestRequest`]**: per-test state; `db()`, `transactional_db()` and
//!   `reset_sequences_db()` activate exactly one isolation level
//! - **Parallel-safe names**: worker and environment suffixes keep parallel
//!   runs on separate databases
//! - **Supporting fixtures**: admin user, settings overrides, live server,
//!   query-count assertions, on-commit capture
//!
//! ## Isolation levels
//!
//! | Fixture              | Strategy                              | After the test             |
//! |----------------------|---------------------------------------|----------------------------|
//! | `db`                 | `reinhardt.test.TestCase`             | savepoint rolled back      |
//! | `transactional_db`   | `reinhardt.test.TransactionTestCase`  | tables flushed             |
//! | `reset_sequences_db` | `reinhardt.test.TransactionTestCase`  | flushed, sequences reset first |
//!
//! When several are requested the strongest wins, and a live server always
//! implies `transactional_db`.
//!
//! ## Quick Start
//!
//! ```
//! use reinhardt_testdb::mock::RecordingBackend;
//! use reinhardt_testdb::{DatabaseConfig, ProjectSettings, TestSession};
//!
//! let backend = RecordingBackend::new();
//! let session = TestSession::builder(backend.clone())
//!     .settings(ProjectSettings::new().with_database("default", DatabaseConfig::sqlite("app.db")))
//!     .build()
//!     .unwrap();
//!
//! {
//!     let mut request = session.request();
//!     request.db().unwrap();
//!     backend.insert("default", "polls_question", "What's up?").unwrap();
//! } // rolled back here
//!
//! assert_eq!(backend.row_count("default", "polls_question"), 0);
//! ```
//!
//! ## Configuration
//!
//! Options are read by [`TestConfig`] from flags or `REINHARDT_TEST_*`
//! environment variables: `--nomigrations`, `--reuse-db`, `--create-db`,
//! `--liveserver`, `--testcase-class`, `--transaction-testcase-class`,
//! `--parallel-env`, `--worker-id` and `--settings`.
//!
//! ## Modules
//!
//! - [`backend`]: collaborator traits implemented by the framework
//! - [`blocker`]: the database access gate
//! - [`config`]: command-line and environment options
//! - [`fixtures`]: clients, admin user, settings, live server, queries, on-commit
//! - [`isolation`]: isolation levels and strategies
//! - [`mock`]: in-memory recording backend for tests
//! - [`session`] / [`request`]: session and per-test state
//! - [`settings`]: project database settings
//! - [`setup`]: session database creation
//! - [`suffix`]: parallel worker suffixes

pub mod backend;
pub mod blocker;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod fixtures;
pub mod isolation;
pub mod logging;
pub mod mock;
pub mod request;
pub mod session;
pub mod settings;
pub mod setup;
pub mod suffix;

pub use backend::{
	AtomicBlock, CapturedQuery, CommitHooks, DatabaseCreation, OnCommitCallback, QueryLog,
	SessionDbHandle, SetupDatabasesArgs, TestDatabaseBackend, TransactionControl,
};
pub use blocker::{BlockerGuard, DbBlocker};
pub use config::TestConfig;
pub use error::{ConfigError, FixtureError, FixtureResult};
pub use finalizer::{FinalizerReport, FinalizerStack};
pub use isolation::strategy::{
	IsolationStrategy, StandardTestCase, StrategyConfig, StrategyRegistry, TransactionTestCase,
};
pub use isolation::{Databases, DbFixture, IsolationLevel};
pub use request::TestRequest;
pub use session::{SessionWarning, TestSession, acquire_session};
pub use settings::{DatabaseConfig, MigrationModules, ProjectSettings};
pub use suffix::set_suffix_to_test_databases;
