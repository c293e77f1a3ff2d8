//! Session context shared by every test in a run
//!
//! [`TestSession`] owns everything that lives for the whole run: the
//! framework backend, the database blocker, the mutable project settings, the
//! parsed options, the resolved isolation strategies, the session finalizers
//! and the warnings collected at teardown.
//!
//! ## Sharing one session between tests
//!
//! ```rust,no_run
//! use reinhardt_testdb::mock::RecordingBackend;
//! use reinhardt_testdb::session::{TestSession, acquire_session};
//! use reinhardt_testdb::settings::{DatabaseConfig, ProjectSettings};
//! use parking_lot::Mutex;
//! use rstest::*;
//! use std::sync::{Arc, OnceLock, Weak};
//!
//! static SESSION: OnceLock<Mutex<Weak<TestSession>>> = OnceLock::new();
//!
//! #[fixture]
//! fn session() -> Arc<TestSession> {
//!     acquire_session(&SESSION, || {
//!         TestSession::builder(RecordingBackend::new())
//!             .settings(ProjectSettings::new().with_database("default", DatabaseConfig::sqlite("app.db")))
//!             .build()
//!     })
//!     .unwrap()
//! }
//!
//! #[rstest]
//! fn test_with_database(session: Arc<TestSession>) {
//!     let mut request = session.request();
//!     request.db().unwrap();
//!     // Finalizers run when `request` is dropped
//! }
//! ```

use crate::backend::TestDatabaseBackend;
use crate::blocker::DbBlocker;
use crate::config::TestConfig;
use crate::error::{FixtureError, FixtureResult};
use crate::finalizer::FinalizerStack;
use crate::fixtures::live_server::{LiveServer, LiveServerFactory};
use crate::fixtures::settings::SettingsOverride;
use crate::isolation::IsolationLevel;
use crate::isolation::strategy::{
	IsolationStrategy, ResolvedStrategies, StrategyConfig, StrategyRegistry,
};
use crate::request::TestRequest;
use crate::settings::ProjectSettings;
use crate::setup;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// A problem reported at session teardown instead of failing the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWarning {
	/// Finalizer that produced the warning
	pub source: String,
	pub message: String,
}

impl SessionWarning {
	pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			source: source.into(),
			message: message.into(),
		}
	}
}

impl fmt::Display for SessionWarning {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.message, self.source)
	}
}

/// Edits the database settings after worker suffixes are applied
pub type ModifyDbSettings = Box<dyn FnOnce(&mut ProjectSettings) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum DbState {
	NotSetUp,
	Ready,
	Failed(String),
}

/// Session-scoped fixture state
pub struct TestSession {
	backend: Arc<dyn TestDatabaseBackend>,
	blocker: Arc<DbBlocker>,
	settings: Arc<RwLock<ProjectSettings>>,
	config: TestConfig,
	strategies: ResolvedStrategies,
	db_state: Mutex<DbState>,
	finalizers: Mutex<FinalizerStack>,
	warnings: Arc<Mutex<Vec<SessionWarning>>>,
	live_server_factory: Option<Arc<dyn LiveServerFactory>>,
	live_server: Mutex<Option<Arc<dyn LiveServer>>>,
	settings_override: Option<Arc<dyn SettingsOverride>>,
	modify_db_settings: Mutex<Option<ModifyDbSettings>>,
}

impl TestSession {
	pub fn builder(backend: Arc<dyn TestDatabaseBackend>) -> TestSessionBuilder {
		TestSessionBuilder::new(backend)
	}

	/// Start a new test request bound to this session
	pub fn request(self: &Arc<Self>) -> TestRequest {
		TestRequest::new(Arc::clone(self))
	}

	pub fn backend(&self) -> &Arc<dyn TestDatabaseBackend> {
		&self.backend
	}

	pub fn blocker(&self) -> &Arc<DbBlocker> {
		&self.blocker
	}

	pub fn config(&self) -> &TestConfig {
		&self.config
	}

	/// Current project settings, including applied suffixes
	pub fn settings(&self) -> RwLockReadGuard<'_, ProjectSettings> {
		self.settings.read()
	}

	pub(crate) fn settings_mut(&self) -> RwLockWriteGuard<'_, ProjectSettings> {
		self.settings.write()
	}

	pub(crate) fn settings_handle(&self) -> Arc<RwLock<ProjectSettings>> {
		Arc::clone(&self.settings)
	}

	pub(crate) fn warnings_handle(&self) -> Arc<Mutex<Vec<SessionWarning>>> {
		Arc::clone(&self.warnings)
	}

	pub(crate) fn settings_override(&self) -> Option<&Arc<dyn SettingsOverride>> {
		self.settings_override.as_ref()
	}

	pub(crate) fn take_modify_db_settings(&self) -> Option<ModifyDbSettings> {
		self.modify_db_settings.lock().take()
	}

	/// Build the strategy serving `level`, returning its registry name
	pub(crate) fn make_strategy(
		&self,
		level: IsolationLevel,
		config: StrategyConfig,
	) -> (String, Box<dyn IsolationStrategy>) {
		let (name, factory) = self.strategies.for_level(level);
		(name.to_string(), factory(config))
	}

	/// Warnings collected so far
	pub fn warnings(&self) -> Vec<SessionWarning> {
		self.warnings.lock().clone()
	}

	/// Names of pending session finalizers in registration order
	pub fn finalizer_names(&self) -> Vec<String> {
		self.finalizers
			.lock()
			.names()
			.into_iter()
			.map(str::to_string)
			.collect()
	}

	pub(crate) fn add_finalizer(
		&self,
		name: impl Into<String>,
		func: impl FnOnce() -> FixtureResult<()> + Send + 'static,
	) {
		self.finalizers.lock().push(name, func);
	}

	/// Create the test databases unless that already happened
	///
	/// Setup runs at most once. A failure is remembered and returned to every
	/// later caller without retrying.
	pub fn ensure_databases(&self) -> FixtureResult<()> {
		let mut state = self.db_state.lock();
		match &*state {
			DbState::Ready => return Ok(()),
			DbState::Failed(message) => return Err(FixtureError::Setup(message.clone())),
			DbState::NotSetUp => {}
		}

		match setup::setup_test_databases(self) {
			Ok(_) => {
				*state = DbState::Ready;
				Ok(())
			}
			Err(err) => {
				let message = match err {
					FixtureError::Setup(message) => message,
					other => other.to_string(),
				};
				tracing::error!(error = %message, "test database setup failed");
				*state = DbState::Failed(message.clone());
				Err(FixtureError::Setup(message))
			}
		}
	}

	/// The session's live server, started on first use
	///
	/// The test databases are set up first, so the server is always stopped
	/// before they are torn down.
	pub fn live_server(&self) -> FixtureResult<Arc<dyn LiveServer>> {
		let mut cached = self.live_server.lock();
		if let Some(server) = cached.as_ref() {
			return Ok(Arc::clone(server));
		}

		let factory = self
			.live_server_factory
			.as_ref()
			.ok_or(FixtureError::LiveServerUnavailable)?;
		self.ensure_databases()?;
		let address = self.config.liveserver_address();
		let server = factory.start(address)?;
		tracing::info!(address, url = %server.url(), "live server started");

		let stopping = Arc::clone(&server);
		self.add_finalizer("live_server_stop", move || stopping.stop());
		*cached = Some(Arc::clone(&server));
		Ok(server)
	}

	/// Run every session finalizer, newest first
	///
	/// Database teardown failures never fail this call; they are collected
	/// in [`warnings`](Self::warnings). Databases are not created again after
	/// a session has finished; build a new session instead.
	pub fn finish(&self) -> FixtureResult<Vec<String>> {
		let mut stack = std::mem::take(&mut *self.finalizers.lock());
		let report = stack.run();
		*self.live_server.lock() = None;
		if !report.executed.is_empty() {
			tracing::debug!(finalizers = ?report.executed, "session finished");
		}
		report.into_result()
	}
}

impl Drop for TestSession {
	fn drop(&mut self) {
		if let Err(err) = self.finish() {
			tracing::warn!(error = %err, "session teardown failed");
		}
	}
}

impl fmt::Debug for TestSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TestSession")
			.field("config", &self.config)
			.field("strategies", &self.strategies)
			.field("db_state", &*self.db_state.lock())
			.field("finalizers", &*self.finalizers.lock())
			.finish_non_exhaustive()
	}
}

/// Builder for [`TestSession`]
pub struct TestSessionBuilder {
	backend: Arc<dyn TestDatabaseBackend>,
	settings: Option<ProjectSettings>,
	config: TestConfig,
	registry: StrategyRegistry,
	live_server_factory: Option<Arc<dyn LiveServerFactory>>,
	settings_override: Option<Arc<dyn SettingsOverride>>,
	modify_db_settings: Option<ModifyDbSettings>,
}

impl TestSessionBuilder {
	fn new(backend: Arc<dyn TestDatabaseBackend>) -> Self {
		Self {
			backend,
			settings: None,
			config: TestConfig::default(),
			registry: StrategyRegistry::new(),
			live_server_factory: None,
			settings_override: None,
			modify_db_settings: None,
		}
	}

	/// Use these settings instead of the file named by `--settings`
	pub fn settings(mut self, settings: ProjectSettings) -> Self {
		self.settings = Some(settings);
		self
	}

	pub fn config(mut self, config: TestConfig) -> Self {
		self.config = config;
		self
	}

	pub fn registry(mut self, registry: StrategyRegistry) -> Self {
		self.registry = registry;
		self
	}

	/// Register an extra isolation strategy under `name`
	pub fn strategy<F>(mut self, name: impl Into<String>, factory: F) -> Self
	where
		F: Fn(StrategyConfig) -> Box<dyn IsolationStrategy> + Send + Sync + 'static,
	{
		self.registry.register(name, factory);
		self
	}

	pub fn live_server_factory(mut self, factory: Arc<dyn LiveServerFactory>) -> Self {
		self.live_server_factory = Some(factory);
		self
	}

	pub fn settings_override(mut self, settings_override: Arc<dyn SettingsOverride>) -> Self {
		self.settings_override = Some(settings_override);
		self
	}

	/// Adjust the database settings just before the test databases are created
	///
	/// `modify` runs once, after worker suffixes have been applied, so it sees
	/// the final test database names.
	pub fn modify_db_settings<F>(mut self, modify: F) -> Self
	where
		F: FnOnce(&mut ProjectSettings) + Send + 'static,
	{
		self.modify_db_settings = Some(Box::new(modify));
		self
	}

	/// Validate the configuration and create the session
	///
	/// Fails when a configured test case name is not registered, or when the
	/// settings file cannot be loaded.
	pub fn build(self) -> FixtureResult<Arc<TestSession>> {
		let strategies = ResolvedStrategies::resolve(&self.registry, &self.config)?;
		let settings = match self.settings {
			Some(settings) => settings,
			None => self.config.load_settings()?.unwrap_or_default(),
		};

		let blocker = DbBlocker::new();
		self.backend.attach_blocker(Arc::clone(&blocker));
		tracing::debug!(
			databases = ?settings.aliases(),
			strategies = ?strategies,
			"test session created"
		);

		Ok(Arc::new(TestSession {
			backend: self.backend,
			blocker,
			settings: Arc::new(RwLock::new(settings)),
			config: self.config,
			strategies,
			db_state: Mutex::new(DbState::NotSetUp),
			finalizers: Mutex::new(FinalizerStack::new()),
			warnings: Arc::new(Mutex::new(Vec::new())),
			live_server_factory: self.live_server_factory,
			live_server: Mutex::new(None),
			settings_override: self.settings_override,
			modify_db_settings: Mutex::new(self.modify_db_settings),
		}))
	}
}

/// Get the shared session, creating it if no test holds it
///
/// The cell keeps only a weak reference: once the last test drops its
/// `Arc`, the session finishes and the next caller builds a fresh one.
pub fn acquire_session<F>(
	cell: &'static OnceLock<Mutex<Weak<TestSession>>>,
	init: F,
) -> FixtureResult<Arc<TestSession>>
where
	F: FnOnce() -> FixtureResult<Arc<TestSession>>,
{
	let mutex = cell.get_or_init(|| Mutex::new(Weak::new()));
	let mut weak = mutex.lock();

	if let Some(existing) = weak.upgrade() {
		return Ok(existing);
	}

	let session = init()?;
	*weak = Arc::downgrade(&session);
	Ok(session)
}
