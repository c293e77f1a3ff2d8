//! Project database settings consumed by the fixtures
//!
//! [`ProjectSettings`] mirrors the `DATABASES` and `MIGRATION_MODULES` parts of
//! a Reinhardt settings file. The session mutates it once, before any test
//! database is created: worker suffixes are appended to test database names and
//! migrations may be swapped for the [`MigrationModules::Disabled`] sentinel.
//!
//! Settings can be built in code or loaded from TOML:
//!
//! ```
//! use reinhardt_testdb::settings::ProjectSettings;
//!
//! let settings = ProjectSettings::from_toml_str(r#"
//! [databases.default]
//! engine = "reinhardt.db.backends.postgresql"
//! name = "myapp"
//! host = "localhost"
//! port = 5432
//!
//! [databases.replica]
//! engine = "reinhardt.db.backends.sqlite3"
//! name = "replica.db"
//!
//! [databases.replica.test]
//! name = "replica_test.db"
//!
//! [migration_modules]
//! polls = "polls.db_migrations"
//! "#).unwrap();
//!
//! assert_eq!(settings.databases["default"].name, "myapp");
//! assert_eq!(settings.databases["replica"].test.name.as_deref(), Some("replica_test.db"));
//! assert_eq!(settings.migration_modules.get("polls"), Some("polls.db_migrations"));
//! ```

use crate::error::{ConfigError, FixtureError, FixtureResult};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Alias of the database every test uses unless it selects others
pub const DEFAULT_DB_ALIAS: &str = "default";

/// Name SQLite uses for a database that lives only in memory
pub const IN_MEMORY_NAME: &str = ":memory:";

/// Test-only overrides for one database
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TestDatabaseConfig {
	/// Name of the test database; derived from the real name when unset
	#[serde(default)]
	pub name: Option<String>,
}

/// Database configuration
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
	/// Database engine/backend
	pub engine: String,

	/// Database name or path
	pub name: String,

	/// Database user (if applicable)
	#[serde(default)]
	pub user: Option<String>,

	/// Database password (if applicable)
	#[serde(default)]
	pub password: Option<String>,

	/// Database host (if applicable)
	#[serde(default)]
	pub host: Option<String>,

	/// Database port (if applicable)
	#[serde(default)]
	pub port: Option<u16>,

	/// Additional options
	#[serde(default)]
	pub options: HashMap<String, String>,

	/// Test database overrides
	#[serde(default)]
	pub test: TestDatabaseConfig,
}

impl DatabaseConfig {
	/// Create a SQLite database configuration
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_testdb::settings::DatabaseConfig;
	///
	/// let db = DatabaseConfig::sqlite("myapp.db");
	/// assert_eq!(db.engine, "reinhardt.db.backends.sqlite3");
	/// assert!(db.is_sqlite());
	/// assert!(db.test.name.is_none());
	/// ```
	pub fn sqlite(name: impl Into<String>) -> Self {
		Self::with_engine("reinhardt.db.backends.sqlite3", name)
	}

	/// Create a PostgreSQL database configuration
	pub fn postgresql(
		name: impl Into<String>,
		user: impl Into<String>,
		password: impl Into<String>,
		host: impl Into<String>,
		port: u16,
	) -> Self {
		Self {
			user: Some(user.into()),
			password: Some(password.into()),
			host: Some(host.into()),
			port: Some(port),
			..Self::with_engine("reinhardt.db.backends.postgresql", name)
		}
	}

	/// Create a MySQL database configuration
	pub fn mysql(
		name: impl Into<String>,
		user: impl Into<String>,
		password: impl Into<String>,
		host: impl Into<String>,
		port: u16,
	) -> Self {
		Self {
			user: Some(user.into()),
			password: Some(password.into()),
			host: Some(host.into()),
			port: Some(port),
			..Self::with_engine("reinhardt.db.backends.mysql", name)
		}
	}

	fn with_engine(engine: &str, name: impl Into<String>) -> Self {
		Self {
			engine: engine.to_string(),
			name: name.into(),
			user: None,
			password: None,
			host: None,
			port: None,
			options: HashMap::new(),
			test: TestDatabaseConfig::default(),
		}
	}

	/// Set an explicit test database name
	pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
		self.test.name = Some(name.into());
		self
	}

	/// Whether the engine is a SQLite backend
	pub fn is_sqlite(&self) -> bool {
		self.engine == "sqlite" || self.engine.contains("sqlite")
	}

	/// Name the test database will be created under
	///
	/// SQLite without an explicit test name runs in memory.
	///
	/// ```
	/// use reinhardt_testdb::settings::DatabaseConfig;
	///
	/// let pg = DatabaseConfig::postgresql("myapp", "u", "p", "localhost", 5432);
	/// assert_eq!(pg.test_database_name(), "test_myapp");
	///
	/// let lite = DatabaseConfig::sqlite("myapp.db");
	/// assert_eq!(lite.test_database_name(), ":memory:");
	/// ```
	pub fn test_database_name(&self) -> String {
		match self.test.name.as_deref() {
			Some(name) if !name.is_empty() => name.to_string(),
			_ if self.is_sqlite() => IN_MEMORY_NAME.to_string(),
			_ => format!("test_{}", self.name),
		}
	}
}

/// Registry of per-app migration modules
///
/// `Disabled` is installed when migrations are skipped: every app is reported
/// as present but without migrations, so the framework creates tables
/// directly from the models.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "IndexMap<String, Option<String>>")]
pub enum MigrationModules {
	Configured(IndexMap<String, Option<String>>),
	Disabled,
}

impl MigrationModules {
	/// Whether the registry has an entry for `app_label`
	pub fn contains(&self, app_label: &str) -> bool {
		match self {
			Self::Configured(modules) => modules.contains_key(app_label),
			Self::Disabled => true,
		}
	}

	/// Migration module for `app_label`, `None` meaning "no migrations"
	pub fn get(&self, app_label: &str) -> Option<&str> {
		match self {
			Self::Configured(modules) => modules.get(app_label).and_then(|m| m.as_deref()),
			Self::Disabled => None,
		}
	}

	pub fn is_disabled(&self) -> bool {
		matches!(self, Self::Disabled)
	}
}

impl Default for MigrationModules {
	fn default() -> Self {
		Self::Configured(IndexMap::new())
	}
}

impl From<IndexMap<String, Option<String>>> for MigrationModules {
	fn from(modules: IndexMap<String, Option<String>>) -> Self {
		Self::Configured(modules)
	}
}

/// Database-related part of the project settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ProjectSettings {
	/// Configured connections keyed by alias, in declaration order
	#[serde(default)]
	pub databases: IndexMap<String, DatabaseConfig>,

	#[serde(default)]
	pub migration_modules: MigrationModules,
}

impl ProjectSettings {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a database under `alias`
	pub fn with_database(mut self, alias: impl Into<String>, config: DatabaseConfig) -> Self {
		self.databases.insert(alias.into(), config);
		self
	}

	/// Parse settings from a TOML document
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(source)?)
	}

	/// Read and parse a TOML settings file
	pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.display().to_string(),
			source,
		})?;
		Self::from_toml_str(&source)
	}

	/// Look up a database, failing on unknown aliases
	pub fn database(&self, alias: &str) -> FixtureResult<&DatabaseConfig> {
		self.databases
			.get(alias)
			.ok_or_else(|| FixtureError::UnknownDatabase(alias.to_string()))
	}

	/// All configured aliases, in declaration order
	pub fn aliases(&self) -> Vec<String> {
		self.databases.keys().cloned().collect()
	}
}
