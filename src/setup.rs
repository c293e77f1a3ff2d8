//! Session-wide test database creation
//!
//! Runs once per session, the first time a test needs the database:
//!
//! 1. worker suffixes are applied to every test database name, then the
//!    session's `modify_db_settings` hook (if any) runs,
//! 2. migrations are swapped for the disabled registry when `--nomigrations`
//!    is set (and restored when the session finishes),
//! 3. the framework creates the test databases inside an unblock window,
//! 4. unless `--reuse-db` is set, destroying them is registered as a session
//!    finalizer whose errors are reported as warnings instead of failures.

use crate::backend::{SessionDbHandle, SetupDatabasesArgs};
use crate::config::TestConfig;
use crate::error::FixtureResult;
use crate::session::{SessionWarning, TestSession};
use crate::settings::{MigrationModules, ProjectSettings};
use crate::suffix::apply_parallel_suffixes;
use std::sync::Arc;

/// Teardown failure text, also used as the warning message prefix
pub const TEARDOWN_WARNING: &str = "Error when trying to teardown test databases";

/// How the session creates its databases, derived from [`TestConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseSetupOptions {
	pub use_migrations: bool,
	/// Keep the databases after the session and reuse existing ones
	pub keepdb: bool,
	/// Force recreation even when `keepdb` is set
	pub createdb: bool,
	pub verbosity: u8,
}

impl Default for DatabaseSetupOptions {
	fn default() -> Self {
		Self {
			use_migrations: true,
			keepdb: false,
			createdb: false,
			verbosity: 0,
		}
	}
}

impl From<&TestConfig> for DatabaseSetupOptions {
	fn from(config: &TestConfig) -> Self {
		Self {
			use_migrations: !config.no_migrations,
			keepdb: config.reuse_db,
			createdb: config.create_db,
			verbosity: config.verbose,
		}
	}
}

impl DatabaseSetupOptions {
	/// Arguments handed to the framework's database creation
	///
	/// ```
	/// use reinhardt_testdb::setup::DatabaseSetupOptions;
	///
	/// let options = DatabaseSetupOptions {
	///     use_migrations: false,
	///     keepdb: true,
	///     createdb: true,
	///     verbosity: 2,
	/// };
	/// let args = options.setup_args();
	/// assert!(!args.keepdb);
	/// assert!(!args.interactive);
	/// assert_eq!(args.verbosity, 2);
	/// assert_eq!(args.migrate_verbosity, 0);
	/// ```
	pub fn setup_args(&self) -> SetupDatabasesArgs {
		SetupDatabasesArgs {
			verbosity: self.verbosity,
			interactive: false,
			keepdb: self.keepdb && !self.createdb,
			migrate_verbosity: if self.use_migrations { self.verbosity } else { 0 },
		}
	}
}

/// Install the disabled migration registry, returning the one it replaced
pub fn disable_native_migrations(settings: &mut ProjectSettings) -> MigrationModules {
	std::mem::replace(&mut settings.migration_modules, MigrationModules::Disabled)
}

pub(crate) fn setup_test_databases(session: &TestSession) -> FixtureResult<SessionDbHandle> {
	let options = DatabaseSetupOptions::from(session.config());

	{
		let mut settings = session.settings_mut();
		let suffixes = apply_parallel_suffixes(&mut settings, session.config());
		if !suffixes.is_empty() {
			tracing::debug!(?suffixes, "applied worker suffixes to test databases");
		}
		if let Some(modify) = session.take_modify_db_settings() {
			modify(&mut *settings);
			tracing::debug!(databases = ?settings.aliases(), "database settings modified");
		}

		if !options.use_migrations {
			let original = disable_native_migrations(&mut settings);
			let handle = session.settings_handle();
			session.add_finalizer("restore_migration_modules", move || {
				handle.write().migration_modules = original;
				Ok(())
			});
		}
	}

	let args = options.setup_args();
	let handle = {
		let _unblocked = session.blocker().unblock_scope();
		let settings = session.settings();
		session.backend().setup_databases(&settings, &args)?
	};
	tracing::info!(
		databases = handle.databases.len(),
		keepdb = args.keepdb,
		migrations = options.use_migrations,
		"test databases ready"
	);

	if !options.keepdb {
		let backend = Arc::clone(session.backend());
		let blocker = Arc::clone(session.blocker());
		let warnings = session.warnings_handle();
		let teardown_handle = handle.clone();
		let verbosity = options.verbosity;
		session.add_finalizer("teardown_databases", move || {
			let _unblocked = blocker.unblock_scope();
			match backend.teardown_databases(&teardown_handle, verbosity) {
				Ok(()) => tracing::info!(
					databases = teardown_handle.databases.len(),
					"test databases destroyed"
				),
				Err(err) => {
					tracing::warn!(error = %err, "{}", TEARDOWN_WARNING);
					warnings.lock().push(SessionWarning::new(
						"teardown_databases",
						format!("{}: {}", TEARDOWN_WARNING, err),
					));
				}
			}
			Ok(())
		});
	}

	Ok(handle)
}
