//! Session database setup and teardown tests

use indexmap::IndexMap;
use parking_lot::Mutex;
use reinhardt_testdb::logging::init_test_logging;
use reinhardt_testdb::mock::{BackendEvent, RecordingBackend};
use reinhardt_testdb::session::acquire_session;
use reinhardt_testdb::{DatabaseConfig, MigrationModules, ProjectSettings, TestConfig, TestSession};
use rstest::rstest;
use serial_test::serial;
use std::sync::{Arc, OnceLock, Weak};

fn project_settings() -> ProjectSettings {
	let mut modules = IndexMap::new();
	modules.insert("polls".to_string(), Some("polls.db_migrations".to_string()));

	ProjectSettings {
		migration_modules: MigrationModules::from(modules),
		..ProjectSettings::new()
			.with_database(
				"default",
				DatabaseConfig::postgresql("myapp", "app", "secret", "localhost", 5432),
			)
			.with_database("cache", DatabaseConfig::sqlite("cache.db"))
			.with_database(
				"reports",
				DatabaseConfig::sqlite("reports.db").with_test_name(":memory:"),
			)
	}
}

fn build(config: TestConfig) -> (Arc<RecordingBackend>, Arc<TestSession>) {
	init_test_logging();
	let backend = RecordingBackend::new();
	let session = TestSession::builder(backend.clone())
		.settings(project_settings())
		.config(config)
		.build()
		.expect("Failed to build test session");
	(backend, session)
}

fn setup_event(backend: &RecordingBackend) -> BackendEvent {
	backend
		.events()
		.into_iter()
		.find(|e| matches!(e, BackendEvent::SetupDatabases { .. }))
		.expect("Databases should have been set up")
}

#[rstest]
fn test_parallel_suffixes_compose() {
	let (backend, session) = build(TestConfig {
		parallel_env: Some("py311-django42".to_string()),
		worker_id: Some("gw3".to_string()),
		..TestConfig::default()
	});

	session.ensure_databases().unwrap();

	assert_eq!(
		backend.test_database_name("default").as_deref(),
		Some("test_myapp_py311-django42_gw3")
	);
	// SQLite defaults to memory and explicit memory names are never suffixed
	assert_eq!(backend.test_database_name("cache").as_deref(), Some(":memory:"));
	assert_eq!(backend.test_database_name("reports").as_deref(), Some(":memory:"));
	assert_eq!(
		session.settings().databases["default"].test.name.as_deref(),
		Some("test_myapp_py311-django42_gw3")
	);
}

#[rstest]
fn test_without_workers_names_are_untouched() {
	let (backend, session) = build(TestConfig::default());
	session.ensure_databases().unwrap();
	assert_eq!(backend.test_database_name("default").as_deref(), Some("test_myapp"));
}

#[rstest]
fn test_nomigrations_round_trip() {
	let (backend, session) = build(TestConfig {
		no_migrations: true,
		verbose: 2,
		..TestConfig::default()
	});

	session.ensure_databases().unwrap();

	assert!(matches!(
		setup_event(&backend),
		BackendEvent::SetupDatabases {
			verbosity: 2,
			migrate_verbosity: 0,
			migrations_disabled: true,
			..
		}
	));
	let during = session.settings().migration_modules.clone();
	assert!(during.contains("polls"));
	assert!(during.contains("not_an_app"));
	assert_eq!(during.get("polls"), None);

	let executed = session.finish().unwrap();

	assert_eq!(executed, vec!["teardown_databases", "restore_migration_modules"]);
	assert_eq!(
		session.settings().migration_modules,
		project_settings().migration_modules
	);
}

#[rstest]
fn test_migrations_enabled_by_default() {
	let (backend, session) = build(TestConfig {
		verbose: 1,
		..TestConfig::default()
	});

	session.ensure_databases().unwrap();

	assert!(matches!(
		setup_event(&backend),
		BackendEvent::SetupDatabases {
			migrate_verbosity: 1,
			migrations_disabled: false,
			..
		}
	));
}

#[rstest]
#[case(false, false, false, true)]
#[case(true, false, true, false)]
#[case(true, true, false, false)]
fn test_reuse_and_create_flags(
	#[case] reuse_db: bool,
	#[case] create_db: bool,
	#[case] expected_keepdb: bool,
	#[case] expected_teardown: bool,
) {
	let (backend, session) = build(TestConfig {
		reuse_db,
		create_db,
		..TestConfig::default()
	});

	session.ensure_databases().unwrap();
	session.finish().unwrap();

	assert!(matches!(
		setup_event(&backend),
		BackendEvent::SetupDatabases { keepdb, .. } if keepdb == expected_keepdb
	));
	let torn_down = backend
		.events()
		.iter()
		.any(|e| matches!(e, BackendEvent::TeardownDatabases { .. }));
	assert_eq!(torn_down, expected_teardown);
}

#[rstest]
fn test_teardown_error_is_reported_as_warning() {
	let (backend, session) = build(TestConfig::default());
	backend.fail_teardown("database \"test_myapp\" is being accessed by other users");

	session.ensure_databases().unwrap();
	let executed = session.finish().expect("Teardown errors must not fail the session");

	assert_eq!(executed, vec!["teardown_databases"]);
	let warnings = session.warnings();
	assert_eq!(warnings.len(), 1);
	assert_eq!(warnings[0].source, "teardown_databases");
	assert!(
		warnings[0]
			.message
			.starts_with("Error when trying to teardown test databases: ")
	);
	assert!(warnings[0].message.contains("being accessed by other users"));
}

#[rstest]
fn test_dropping_last_session_tears_down() {
	let (backend, session) = build(TestConfig::default());
	session.ensure_databases().unwrap();

	drop(session);

	assert!(matches!(
		backend.events().last(),
		Some(BackendEvent::TeardownDatabases { test_names }) if test_names.len() == 3
	));
}

static SHARED: OnceLock<Mutex<Weak<TestSession>>> = OnceLock::new();

#[rstest]
#[serial(shared_session)]
fn test_acquire_session_shares_setup() {
	let backend = RecordingBackend::new();
	let init = || {
		TestSession::builder(backend.clone())
			.settings(project_settings())
			.build()
	};

	let first = acquire_session(&SHARED, init).unwrap();
	let second = acquire_session(&SHARED, init).unwrap();
	first.ensure_databases().unwrap();
	second.ensure_databases().unwrap();

	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(
		backend
			.events()
			.iter()
			.filter(|e| matches!(e, BackendEvent::SetupDatabases { .. }))
			.count(),
		1
	);

	drop(first);
	drop(second);
	assert!(matches!(
		backend.events().last(),
		Some(BackendEvent::TeardownDatabases { .. })
	));
}

#[rstest]
#[serial(reinhardt_test_env)]
fn test_worker_id_from_environment() {
	// SAFETY: Setting environment variables is unsafe in multi-threaded programs.
	// This test uses #[serial] to ensure exclusive access to environment variables.
	unsafe {
		std::env::set_var("REINHARDT_TEST_WORKER_ID", "gw5");
	}
	let config = TestConfig::from_env();
	// SAFETY: Removing environment variables is unsafe in multi-threaded programs.
	// This test uses #[serial] to ensure exclusive access to environment variables.
	unsafe {
		std::env::remove_var("REINHARDT_TEST_WORKER_ID");
	}

	let (backend, session) = build(config.unwrap());
	session.ensure_databases().unwrap();

	assert_eq!(
		backend.test_database_name("default").as_deref(),
		Some("test_myapp_gw5")
	);
}
