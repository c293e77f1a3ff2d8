//! Command-line and environment options for database fixtures
//!
//! Every option can be given as a flag or through an environment variable.
//! Test binaries built by `cargo test` receive the harness's own arguments, so
//! [`TestConfig::from_env`] parses an empty argument list and only honours the
//! environment. Custom harnesses can call [`TestConfig::from_args`].

use crate::error::{ConfigError, FixtureResult};
use crate::settings::ProjectSettings;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Registry key of the built-in savepoint strategy
pub const DEFAULT_TESTCASE_CLASS: &str = "reinhardt.test.TestCase";

/// Registry key of the built-in flush strategy
pub const DEFAULT_TRANSACTION_TESTCASE_CLASS: &str = "reinhardt.test.TransactionTestCase";

/// Address the live server binds to when nothing else is configured
pub const DEFAULT_LIVESERVER_ADDRESS: &str = "localhost";

/// Options controlling test database setup and isolation
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
#[command(name = "reinhardt-test", about = "Reinhardt test database options")]
pub struct TestConfig {
	/// Skip migrations and create tables directly from the models
	#[arg(long = "nomigrations", alias = "no-migrations", env = "REINHARDT_TEST_NOMIGRATIONS")]
	pub no_migrations: bool,

	/// Keep test databases between runs
	#[arg(long = "reuse-db", env = "REINHARDT_TEST_REUSE_DB")]
	pub reuse_db: bool,

	/// Recreate test databases even when --reuse-db is set
	#[arg(long = "create-db", env = "REINHARDT_TEST_CREATE_DB")]
	pub create_db: bool,

	/// Verbosity of setup output and query assertion failures
	#[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
	pub verbose: u8,

	/// Address the live server binds to
	#[arg(long = "liveserver", env = "REINHARDT_LIVE_TEST_SERVER_ADDRESS")]
	pub liveserver: Option<String>,

	/// Registry key of the strategy used by the `db` fixture
	#[arg(long = "testcase-class", env = "REINHARDT_TEST_CASE_CLASS")]
	pub testcase_class: Option<String>,

	/// Registry key of the strategy used by the transactional fixtures
	#[arg(
		long = "transaction-testcase-class",
		env = "REINHARDT_TRANSACTION_TEST_CASE_CLASS"
	)]
	pub transaction_testcase_class: Option<String>,

	/// Name of the parallel runner environment, appended to test database names
	#[arg(long = "parallel-env", env = "REINHARDT_TEST_PARALLEL_ENV")]
	pub parallel_env: Option<String>,

	/// Identifier of this worker process, appended to test database names
	#[arg(long = "worker-id", env = "REINHARDT_TEST_WORKER_ID")]
	pub worker_id: Option<String>,

	/// TOML file holding the database settings
	#[arg(long = "settings", env = "REINHARDT_TEST_SETTINGS")]
	pub settings: Option<PathBuf>,
}

impl TestConfig {
	/// Read options from the environment only
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_args(std::iter::empty::<String>())
	}

	/// Parse options from explicit arguments, falling back to the environment
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_testdb::config::TestConfig;
	///
	/// let config = TestConfig::from_args(["--reuse-db", "-vv", "--worker-id", "gw1"]).unwrap();
	/// assert!(config.reuse_db);
	/// assert_eq!(config.verbose, 2);
	/// assert_eq!(config.worker_id.as_deref(), Some("gw1"));
	/// ```
	pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = T>,
		T: Into<std::ffi::OsString> + Clone,
	{
		let argv = std::iter::once(std::ffi::OsString::from("reinhardt-test"))
			.chain(args.into_iter().map(Into::into));
		Ok(Self::try_parse_from(argv)?)
	}

	/// Strategy key for the `db` fixture
	pub fn testcase_class(&self) -> &str {
		self.testcase_class
			.as_deref()
			.filter(|name| !name.is_empty())
			.unwrap_or(DEFAULT_TESTCASE_CLASS)
	}

	/// Strategy key for the transactional fixtures
	pub fn transaction_testcase_class(&self) -> &str {
		self.transaction_testcase_class
			.as_deref()
			.filter(|name| !name.is_empty())
			.unwrap_or(DEFAULT_TRANSACTION_TESTCASE_CLASS)
	}

	/// Address for the live server
	pub fn liveserver_address(&self) -> &str {
		self.liveserver
			.as_deref()
			.filter(|addr| !addr.is_empty())
			.unwrap_or(DEFAULT_LIVESERVER_ADDRESS)
	}

	/// Whether query assertion failures list the executed SQL
	pub fn is_verbose(&self) -> bool {
		self.verbose > 0
	}

	/// Load the settings file named by `--settings`, if any
	pub fn load_settings(&self) -> FixtureResult<Option<ProjectSettings>> {
		match &self.settings {
			Some(path) => Ok(Some(ProjectSettings::from_toml_file(path)?)),
			None => Ok(None),
		}
	}
}
