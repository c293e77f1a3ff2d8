//! Per-test isolation lifecycle tests
//!
//! Every test builds its own session over a fresh in-memory recording backend,
//! so the tests share no gate or database state and can run in parallel.

use mockall::mock;
use mockall::predicate::eq;
use parking_lot::Mutex;
use reinhardt_testdb::fixtures::live_server::{LiveServer, LiveServerFactory};
use reinhardt_testdb::isolation::strategy::{IsolationStrategy, StrategyConfig};
use reinhardt_testdb::logging::init_test_logging;
use reinhardt_testdb::mock::{BackendEvent, RecordingBackend};
use reinhardt_testdb::{
	DatabaseConfig, DbFixture, FixtureError, FixtureResult, IsolationLevel, ProjectSettings,
	TestConfig, TestDatabaseBackend, TestSession,
};
use rstest::{fixture, rstest};
use std::sync::Arc;

mock! {
	pub Server {}

	impl LiveServer for Server {
		fn url(&self) -> String;
		fn enable_modified_settings(&self) -> FixtureResult<()>;
		fn disable_modified_settings(&self) -> FixtureResult<()>;
		fn stop(&self) -> FixtureResult<()>;
	}
}

mock! {
	pub ServerFactory {}

	impl LiveServerFactory for ServerFactory {
		fn start(&self, address: &str) -> FixtureResult<Arc<dyn LiveServer>>;
	}
}

struct Env {
	backend: Arc<RecordingBackend>,
	session: Arc<TestSession>,
}

fn project_settings() -> ProjectSettings {
	ProjectSettings::new().with_database(
		"default",
		DatabaseConfig::postgresql("myapp", "app", "secret", "localhost", 5432),
	)
}

/// Session over a fresh recording backend with default options
#[fixture]
fn env() -> Env {
	init_test_logging();
	let backend = RecordingBackend::new();
	let session = TestSession::builder(backend.clone())
		.settings(project_settings())
		.build()
		.expect("Failed to build test session");
	Env { backend, session }
}

fn count(backend: &RecordingBackend, pred: impl Fn(&BackendEvent) -> bool) -> usize {
	backend.events().iter().filter(|e| pred(e)).count()
}

/// Insert one row in a fresh request using `fixture`, returning its id
fn insert_in_test(env: &Env, fixture: DbFixture) -> i64 {
	let mut request = env.session.request();
	let activated = match fixture {
		DbFixture::Db => request.db(),
		DbFixture::TransactionalDb => request.transactional_db(),
		DbFixture::ResetSequencesDb => request.reset_sequences_db(),
	};
	activated.expect("Failed to activate database fixture");
	let id = env
		.backend
		.insert("default", "polls_question", "What's up?")
		.expect("Insert should be allowed inside a database test");
	request.finish().expect("Teardown should succeed");
	id
}

#[rstest]
fn test_reset_sequences_reuses_ids_across_tests(env: Env) {
	assert_eq!(insert_in_test(&env, DbFixture::ResetSequencesDb), 1);
	assert_eq!(insert_in_test(&env, DbFixture::ResetSequencesDb), 1);
	assert_eq!(env.backend.row_count("default", "polls_question"), 0);
	assert_eq!(
		count(&env.backend, |e| matches!(e, BackendEvent::ResetSequences { .. })),
		2
	);
}

#[rstest]
#[case(DbFixture::Db)]
#[case(DbFixture::TransactionalDb)]
fn test_other_levels_keep_counting(env: Env, #[case] fixture: DbFixture) {
	assert_eq!(insert_in_test(&env, fixture), 1);
	assert_eq!(insert_in_test(&env, fixture), 2);
	assert_eq!(env.backend.row_count("default", "polls_question"), 0);
	assert_eq!(
		count(&env.backend, |e| matches!(e, BackendEvent::ResetSequences { .. })),
		0
	);
}

#[rstest]
fn test_reset_sequences_wins_over_everything(env: Env) {
	let mut request = env
		.session
		.request()
		.declare(DbFixture::Db)
		.declare(DbFixture::TransactionalDb)
		.declare(DbFixture::ResetSequencesDb)
		.declare_live_server();

	request.db().unwrap();
	request.transactional_db().unwrap();
	request.reset_sequences_db().unwrap();

	assert_eq!(request.active_level(), Some(IsolationLevel::TransactionalResetSeq));
	assert_eq!(
		request.strategy_name(),
		Some("reinhardt.test.TransactionTestCase")
	);
}

#[rstest]
fn test_db_with_transactional_db_wraps_once(env: Env) {
	let mut request = env.session.request().declare(DbFixture::TransactionalDb);
	request.db().unwrap();
	request.transactional_db().unwrap();

	assert_eq!(
		request
			.finalizer_names()
			.iter()
			.filter(|name| **name == "post_teardown")
			.count(),
		1
	);
	request.finish().unwrap();

	assert_eq!(count(&env.backend, |e| matches!(e, BackendEvent::Flush { .. })), 1);
	assert_eq!(
		count(&env.backend, |e| matches!(e, BackendEvent::CloseConnection { .. })),
		1
	);
	assert_eq!(
		count(&env.backend, |e| matches!(e, BackendEvent::BeginAtomic { .. })),
		0
	);
}

#[rstest]
fn test_finalizers_run_in_reverse_order(env: Env) {
	let mut request = env.session.request();
	request.db().unwrap();

	let executed = request.finish().unwrap();

	assert_eq!(executed, vec!["post_teardown", "class_teardown", "blocker_restore"]);
	assert!(env.session.blocker().is_blocked());
}

#[rstest]
fn test_access_without_db_fixture_is_blocked(env: Env) {
	let _request = env.session.request();

	let err = env
		.backend
		.insert("default", "polls_question", "sneaky")
		.unwrap_err();

	assert!(matches!(err, FixtureError::DatabaseAccessBlocked { .. }));
	assert!(err.to_string().contains("use the \"db\" or \"transactional_db\" fixture"));
}

#[rstest]
fn test_gate_reopens_only_for_database_tests(env: Env) {
	{
		let mut request = env.session.request();
		request.db().unwrap();
		assert!(env.backend.insert("default", "polls_question", "ok").is_ok());
	}
	assert!(env.backend.insert("default", "polls_question", "late").is_err());
}

#[rstest]
fn test_databases_created_once_per_session(env: Env) {
	insert_in_test(&env, DbFixture::Db);
	insert_in_test(&env, DbFixture::TransactionalDb);

	assert_eq!(
		count(&env.backend, |e| matches!(e, BackendEvent::SetupDatabases { .. })),
		1
	);
	assert_eq!(
		env.backend.test_database_name("default").as_deref(),
		Some("test_myapp")
	);
}

#[rstest]
fn test_live_server_forces_transactional_isolation() {
	let mut server = MockServer::new();
	server.expect_url().return_const("http://localhost:8081".to_string());
	server.expect_enable_modified_settings().times(2).returning(|| Ok(()));
	server.expect_disable_modified_settings().times(2).returning(|| Ok(()));
	server.expect_stop().times(1).returning(|| Ok(()));
	let server = Arc::new(server);

	let mut factory = MockServerFactory::new();
	let started = Arc::clone(&server);
	factory
		.expect_start()
		.with(eq("localhost"))
		.times(1)
		.returning(move |_| Ok(Arc::clone(&started) as Arc<dyn LiveServer>));

	let backend = RecordingBackend::new();
	let session = TestSession::builder(backend.clone())
		.settings(project_settings())
		.live_server_factory(Arc::new(factory))
		.build()
		.unwrap();

	for _ in 0..2 {
		let mut request = session.request().declare_live_server();
		request.db().unwrap();
		assert_eq!(request.active_level(), Some(IsolationLevel::Transactional));

		let live = request.live_server().unwrap();
		assert_eq!(live.url(), "http://localhost:8081");
		assert_eq!(
			request.finalizer_names().last().copied(),
			Some("live_server_settings")
		);
		request.finish().unwrap();
	}

	let executed = session.finish().unwrap();
	assert_eq!(executed, vec!["live_server_stop", "teardown_databases"]);
	assert_eq!(count(&backend, |e| matches!(e, BackendEvent::Flush { .. })), 2);
}

#[rstest]
fn test_live_server_configured_address() {
	let mut factory = MockServerFactory::new();
	factory
		.expect_start()
		.with(eq("0.0.0.0:9000"))
		.times(1)
		.returning(|_| Err(FixtureError::LiveServer("address in use".to_string())));

	let config = TestConfig {
		liveserver: Some("0.0.0.0:9000".to_string()),
		..TestConfig::default()
	};
	let session = TestSession::builder(RecordingBackend::new())
		.settings(project_settings())
		.config(config)
		.live_server_factory(Arc::new(factory))
		.build()
		.unwrap();

	let mut request = session.request();
	let err = request.live_server().err().unwrap();
	assert!(err.to_string().contains("address in use"));
	assert_eq!(request.active_level(), Some(IsolationLevel::Transactional));
}

#[derive(Clone, Default)]
struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
	fn push(&self, entry: impl Into<String>) {
		self.0.lock().push(entry.into());
	}

	fn entries(&self) -> Vec<String> {
		self.0.lock().clone()
	}
}

struct CountingCase {
	config: StrategyConfig,
	log: HookLog,
}

impl IsolationStrategy for CountingCase {
	fn class_setup(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		self.log.push(format!("class_setup {:?}", self.config.databases));
		Ok(())
	}

	fn pre_setup(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		self.log.push(format!("pre_setup reset={}", self.config.reset_sequences));
		Ok(())
	}

	fn post_teardown(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		self.log.push("post_teardown");
		Ok(())
	}

	fn class_teardown(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		self.log.push("class_teardown");
		Ok(())
	}
}

#[rstest]
fn test_custom_strategy_selected_by_name() {
	let log = HookLog::default();
	let factory_log = log.clone();
	let config = TestConfig {
		testcase_class: Some("myapp.tests.CountingCase".to_string()),
		..TestConfig::default()
	};

	let session = TestSession::builder(RecordingBackend::new())
		.settings(project_settings())
		.config(config)
		.strategy("myapp.tests.CountingCase", move |config| {
			Box::new(CountingCase {
				config,
				log: factory_log.clone(),
			})
		})
		.build()
		.unwrap();

	let mut request = session.request();
	request.db().unwrap();
	assert_eq!(request.strategy_name(), Some("myapp.tests.CountingCase"));
	request.finish().unwrap();

	assert_eq!(
		log.entries(),
		vec![
			"class_setup [\"default\"]",
			"pre_setup reset=false",
			"post_teardown",
			"class_teardown",
		]
	);
}

/// Opens the class block, then fails before the test block
struct BrokenPreSetup;

impl IsolationStrategy for BrokenPreSetup {
	fn class_setup(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		backend.begin_atomic("default").map(|_| ())
	}

	fn pre_setup(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		Err(FixtureError::database("default", "savepoint refused"))
	}

	fn post_teardown(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		Ok(())
	}

	fn class_teardown(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		backend.rollback_atomic(&reinhardt_testdb::AtomicBlock {
			alias: "default".to_string(),
			depth: 1,
			savepoint: None,
		})
	}
}

#[rstest]
fn test_strategy_failure_closes_gate_and_stays_failed() {
	let backend = RecordingBackend::new();
	let session = TestSession::builder(backend.clone())
		.settings(project_settings())
		.config(TestConfig {
			testcase_class: Some("myapp.tests.Broken".to_string()),
			..TestConfig::default()
		})
		.strategy("myapp.tests.Broken", |_| Box::new(BrokenPreSetup))
		.build()
		.unwrap();

	let mut request = session.request();
	let first = request.db().unwrap_err();
	assert!(first.to_string().contains("savepoint refused"));

	// Partial setup was unwound right away
	assert!(session.blocker().is_blocked());
	assert!(request.finalizer_names().is_empty());
	assert!(matches!(
		backend.events().last(),
		Some(BackendEvent::RollbackAtomic { depth: 1, .. })
	));

	let second = request.db().unwrap_err();
	assert!(matches!(second, FixtureError::ActivationFailed(ref msg) if msg.contains("savepoint refused")));
	assert_eq!(request.active_level(), None);
	assert!(backend.insert("default", "polls_question", "leak").is_err());
}

#[rstest]
fn test_unknown_strategy_fails_at_session_build() {
	let config = TestConfig {
		transaction_testcase_class: Some("myapp.tests.Gone".to_string()),
		..TestConfig::default()
	};

	let err = TestSession::builder(RecordingBackend::new())
		.settings(project_settings())
		.config(config)
		.build()
		.unwrap_err();

	let message = err.to_string();
	assert!(message.contains("'myapp.tests.Gone'"));
	assert!(message.contains("'transaction_testcase_class'"));
}

#[rstest]
fn test_setup_failure_reaches_every_test(env: Env) {
	env.backend.fail_setup("could not connect to server");

	for _ in 0..2 {
		let mut request = env.session.request();
		let err = request.transactional_db().unwrap_err();
		assert!(matches!(err, FixtureError::Setup(ref msg) if msg.contains("could not connect")));
		assert!(request.finalizer_names().is_empty());
	}
	assert!(env.session.blocker().is_blocked());
}
