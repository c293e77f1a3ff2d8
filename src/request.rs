//! Per-test fixture request
//!
//! A [`TestRequest`] is what a single test holds on to. It records which
//! database fixtures the test declared, activates exactly one isolation level
//! for them, and keeps the finalizers that undo everything the test set up.
//! Finalizers run in reverse order when [`TestRequest::finish`] is called or,
//! failing that, when the request is dropped, so a panicking test still rolls
//! back and closes the database gate.
//!
//! ```
//! use reinhardt_testdb::isolation::DbFixture;
//! use reinhardt_testdb::mock::RecordingBackend;
//! use reinhardt_testdb::session::TestSession;
//! use reinhardt_testdb::settings::{DatabaseConfig, ProjectSettings};
//!
//! let session = TestSession::builder(RecordingBackend::new())
//!     .settings(ProjectSettings::new().with_database("default", DatabaseConfig::sqlite("app.db")))
//!     .build()
//!     .unwrap();
//!
//! // Declared up front: `db` and `transactional_db` resolve to one level
//! let mut request = session.request().declare(DbFixture::TransactionalDb);
//! request.db().unwrap();
//! request.transactional_db().unwrap();
//! assert!(!session.blocker().is_blocked());
//!
//! let executed = request.finish().unwrap();
//! assert_eq!(executed, vec!["post_teardown", "class_teardown", "blocker_restore"]);
//! assert!(session.blocker().is_blocked());
//! ```

use crate::error::{FixtureError, FixtureResult};
use crate::finalizer::FinalizerStack;
use crate::fixtures::live_server::LiveServer;
use crate::fixtures::settings::SettingsWrapper;
use crate::isolation::strategy::StrategyConfig;
use crate::isolation::{Databases, DbFixture, FixtureSet, IsolationLevel};
use crate::session::TestSession;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Fixture state for one test
pub struct TestRequest {
	session: Arc<TestSession>,
	fixtures: FixtureSet,
	databases: Databases,
	native_test_case: bool,
	active: Option<IsolationLevel>,
	strategy_name: Option<String>,
	failed: Option<String>,
	finalizers: FinalizerStack,
	settings: Option<Arc<SettingsWrapper>>,
	live_server: Option<Arc<dyn LiveServer>>,
}

impl TestRequest {
	pub(crate) fn new(session: Arc<TestSession>) -> Self {
		Self {
			session,
			fixtures: FixtureSet::new(),
			databases: Databases::Default,
			native_test_case: false,
			active: None,
			strategy_name: None,
			failed: None,
			finalizers: FinalizerStack::new(),
			settings: None,
			live_server: None,
		}
	}

	/// Declare a database fixture before any of them is activated
	pub fn declare(mut self, fixture: DbFixture) -> Self {
		self.fixtures.declare(fixture);
		self
	}

	/// Declare that the test uses the live server
	pub fn declare_live_server(mut self) -> Self {
		self.fixtures.declare_live_server();
		self
	}

	/// Select the databases the test runs against
	pub fn databases(mut self, databases: Databases) -> Self {
		self.databases = databases;
		self
	}

	/// Mark the test as a framework-native test case that isolates itself
	pub fn native_test_case(mut self, native: bool) -> Self {
		self.native_test_case = native;
		self
	}

	pub fn session(&self) -> &Arc<TestSession> {
		&self.session
	}

	pub fn fixtures(&self) -> &FixtureSet {
		&self.fixtures
	}

	/// Isolation level currently in effect, if any was activated
	pub fn active_level(&self) -> Option<IsolationLevel> {
		self.active
	}

	/// Registry name of the strategy isolating this test
	pub fn strategy_name(&self) -> Option<&str> {
		self.strategy_name.as_deref()
	}

	/// Level the declared fixtures resolve to right now
	pub fn resolved_level(&self) -> IsolationLevel {
		IsolationLevel::resolve(&self.fixtures, self.native_test_case)
	}

	/// Savepoint-isolated database access
	pub fn db(&mut self) -> FixtureResult<()> {
		self.require(DbFixture::Db)
	}

	/// Database access with real transactions, flushed after the test
	pub fn transactional_db(&mut self) -> FixtureResult<()> {
		self.require(DbFixture::TransactionalDb)
	}

	/// Transactional access with auto-increment counters reset before the test
	pub fn reset_sequences_db(&mut self) -> FixtureResult<()> {
		self.require(DbFixture::ResetSequencesDb)
	}

	fn require(&mut self, fixture: DbFixture) -> FixtureResult<()> {
		self.fixtures.declare(fixture);
		self.activate_resolved()
	}

	fn activate_resolved(&mut self) -> FixtureResult<()> {
		if let Some(message) = &self.failed {
			return Err(FixtureError::ActivationFailed(message.clone()));
		}

		let level = self.resolved_level();
		match self.active {
			Some(active) if active >= level => Ok(()),
			Some(active) => Err(FixtureError::IsolationConflict {
				active,
				requested: level,
			}),
			None if !level.uses_database() => Ok(()),
			None => {
				self.activate(level)?;
				self.active = Some(level);
				Ok(())
			}
		}
	}

	/// Set up isolation for `level`
	///
	/// Failures before the gate opens leave the request untouched, so a retry
	/// reports the same error. A strategy failure unwinds what was already set
	/// up, closes the gate again and marks the request as failed: every later
	/// activation returns [`FixtureError::ActivationFailed`].
	fn activate(&mut self, level: IsolationLevel) -> FixtureResult<()> {
		self.session.ensure_databases()?;
		let databases = self.databases.resolve(&self.session.settings())?;

		let mark = self.finalizers.len();
		let blocker = Arc::clone(self.session.blocker());
		blocker.unblock();
		self.finalizers.push("blocker_restore", move || blocker.restore());

		let result = self.run_strategy(level, databases);
		if let Err(err) = &result {
			tracing::warn!(?level, error = %err, "database isolation failed to activate");
			self.failed = Some(err.to_string());
			// Undo the partial activation so the gate is closed again
			let report = self.finalizers.split_off(mark).run();
			for err in &report.errors {
				tracing::warn!(error = %err, "rollback of failed activation failed");
			}
		}
		result
	}

	fn run_strategy(&mut self, level: IsolationLevel, databases: Vec<String>) -> FixtureResult<()> {
		let config = StrategyConfig {
			reset_sequences: level.reset_sequences(),
			databases,
		};
		let (name, strategy) = self.session.make_strategy(level, config);
		tracing::debug!(
			?level,
			strategy = %name,
			fixtures = ?self.fixtures.names(),
			"activating database isolation"
		);
		self.strategy_name = Some(name);

		let strategy = Arc::new(Mutex::new(strategy));
		let backend = Arc::clone(self.session.backend());

		strategy.lock().class_setup(&*backend)?;
		{
			let strategy = Arc::clone(&strategy);
			let backend = Arc::clone(&backend);
			self.finalizers.push("class_teardown", move || {
				strategy.lock().class_teardown(&*backend)
			});
		}

		strategy.lock().pre_setup(&*backend)?;
		self.finalizers.push("post_teardown", move || {
			strategy.lock().post_teardown(&*backend)
		});
		Ok(())
	}

	/// Start (or reuse) the session's live server for this test
	///
	/// Forces transactional isolation and applies the server's settings
	/// until the test finishes.
	pub fn live_server(&mut self) -> FixtureResult<Arc<dyn LiveServer>> {
		if let Some(server) = &self.live_server {
			return Ok(Arc::clone(server));
		}

		self.fixtures.declare_live_server();
		self.fixtures.declare(DbFixture::TransactionalDb);
		self.activate_resolved()?;

		let server = self.session.live_server()?;
		server.enable_modified_settings()?;
		let disabling = Arc::clone(&server);
		self.finalizers.push("live_server_settings", move || {
			disabling.disable_modified_settings()
		});

		self.live_server = Some(Arc::clone(&server));
		Ok(server)
	}

	/// Settings wrapper whose changes are undone after the test
	pub fn settings(&mut self) -> FixtureResult<Arc<SettingsWrapper>> {
		if let Some(wrapper) = &self.settings {
			return Ok(Arc::clone(wrapper));
		}

		let backend = self
			.session
			.settings_override()
			.cloned()
			.ok_or_else(|| {
				FixtureError::Setup("no settings override is configured for this session".to_string())
			})?;
		let wrapper = Arc::new(SettingsWrapper::new(backend));
		let finalizing = Arc::clone(&wrapper);
		self.finalizers.push("settings_finalize", move || finalizing.finalize());

		self.settings = Some(Arc::clone(&wrapper));
		Ok(wrapper)
	}

	/// Register an extra finalizer run with the request's own
	pub fn add_finalizer(
		&mut self,
		name: impl Into<String>,
		func: impl FnOnce() -> FixtureResult<()> + Send + 'static,
	) {
		self.finalizers.push(name, func);
	}

	/// Names of pending finalizers in registration order
	pub fn finalizer_names(&self) -> Vec<&str> {
		self.finalizers.names()
	}

	/// Run every finalizer and report the first failure
	///
	/// Returns the finalizer names in the order they ran.
	pub fn finish(mut self) -> FixtureResult<Vec<String>> {
		self.finalizers.run().into_result()
	}
}

impl Drop for TestRequest {
	fn drop(&mut self) {
		if self.finalizers.is_empty() {
			return;
		}
		let report = self.finalizers.run();
		for err in &report.errors {
			tracing::warn!(error = %err, "test teardown failed");
		}
	}
}

impl fmt::Debug for TestRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TestRequest")
			.field("fixtures", &self.fixtures)
			.field("databases", &self.databases)
			.field("native_test_case", &self.native_test_case)
			.field("active", &self.active)
			.field("finalizers", &self.finalizers)
			.finish_non_exhaustive()
	}
}
