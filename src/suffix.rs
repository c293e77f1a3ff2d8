//! Parallel-safe test database names
//!
//! When several test processes run at once, each one must create its own test
//! databases. Two sources can name a process: the parallel runner environment
//! (for example `py311-pg16` when one CI matrix cell runs several
//! environments side by side) and the worker id handed to each worker process
//! (`gw0`, `gw1`, ...). Each source that is present appends `_<suffix>` to
//! every test database name; when both are present both suffixes are applied,
//! environment first.
//!
//! ```
//! use reinhardt_testdb::settings::{DatabaseConfig, ProjectSettings};
//! use reinhardt_testdb::suffix::set_suffix_to_test_databases;
//!
//! let mut settings = ProjectSettings::new()
//!     .with_database("default", DatabaseConfig::postgresql("myapp", "u", "p", "db", 5432))
//!     .with_database("cache", DatabaseConfig::sqlite("cache.db"));
//!
//! set_suffix_to_test_databases(&mut settings, "gw3");
//!
//! assert_eq!(settings.databases["default"].test.name.as_deref(), Some("test_myapp_gw3"));
//! // SQLite test databases default to memory and cannot be suffixed
//! assert_eq!(settings.databases["cache"].test.name, None);
//! ```

use crate::config::TestConfig;
use crate::settings::{IN_MEMORY_NAME, ProjectSettings};

/// Where a worker suffix comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuffixSource {
	/// Name of the parallel runner environment
	ParallelEnv,
	/// Identifier of the worker process
	WorkerId,
}

impl SuffixSource {
	/// Sources in the order they are applied
	pub const ALL: [SuffixSource; 2] = [SuffixSource::ParallelEnv, SuffixSource::WorkerId];

	/// Suffix this source contributes, if any
	pub fn resolve(self, config: &TestConfig) -> Option<&str> {
		let value = match self {
			Self::ParallelEnv => config.parallel_env.as_deref(),
			Self::WorkerId => config.worker_id.as_deref(),
		};
		value.filter(|suffix| !suffix.is_empty())
	}
}

/// Append `_<suffix>` to the test name of every database that has one
///
/// Databases without an explicit test name get `test_<name>_<suffix>`,
/// except SQLite, whose default test database lives in memory.
pub fn set_suffix_to_test_databases(settings: &mut ProjectSettings, suffix: &str) {
	for (alias, db) in settings.databases.iter_mut() {
		let test_name = match db.test.name.as_deref() {
			Some(name) if !name.is_empty() => name.to_string(),
			_ if db.is_sqlite() => continue,
			_ => format!("test_{}", db.name),
		};

		if test_name == IN_MEMORY_NAME {
			continue;
		}

		let suffixed = format!("{}_{}", test_name, suffix);
		tracing::debug!(alias = %alias, test_name = %suffixed, "suffixed test database name");
		db.test.name = Some(suffixed);
	}
}

/// Apply every suffix source present in `config`, returning the suffixes used
pub fn apply_parallel_suffixes(settings: &mut ProjectSettings, config: &TestConfig) -> Vec<String> {
	let mut applied = Vec::new();
	for source in SuffixSource::ALL {
		if let Some(suffix) = source.resolve(config) {
			set_suffix_to_test_databases(settings, suffix);
			applied.push(suffix.to_string());
		}
	}
	applied
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settings::DatabaseConfig;
	use rstest::{fixture, rstest};

	#[fixture]
	fn settings() -> ProjectSettings {
		ProjectSettings::new()
			.with_database(
				"default",
				DatabaseConfig::postgresql("myapp", "app", "secret", "localhost", 5432),
			)
			.with_database(
				"analytics",
				DatabaseConfig::mysql("stats", "app", "secret", "localhost", 3306)
					.with_test_name("stats_ci"),
			)
			.with_database("memory", DatabaseConfig::sqlite("mem.db").with_test_name(":memory:"))
			.with_database("files", DatabaseConfig::sqlite("files.db").with_test_name("files_test.db"))
			.with_database("local", DatabaseConfig::sqlite("local.db"))
	}

	fn config(parallel_env: Option<&str>, worker_id: Option<&str>) -> TestConfig {
		TestConfig {
			parallel_env: parallel_env.map(str::to_string),
			worker_id: worker_id.map(str::to_string),
			..TestConfig::default()
		}
	}

	#[rstest]
	fn test_both_sources_compose_in_order(mut settings: ProjectSettings) {
		let applied =
			apply_parallel_suffixes(&mut settings, &config(Some("py311-django42"), Some("gw3")));

		assert_eq!(applied, vec!["py311-django42".to_string(), "gw3".to_string()]);
		assert_eq!(
			settings.databases["default"].test.name.as_deref(),
			Some("test_myapp_py311-django42_gw3")
		);
		assert_eq!(
			settings.databases["analytics"].test.name.as_deref(),
			Some("stats_ci_py311-django42_gw3")
		);
	}

	#[rstest]
	fn test_in_memory_never_suffixed(mut settings: ProjectSettings) {
		apply_parallel_suffixes(&mut settings, &config(Some("py311"), Some("gw0")));

		assert_eq!(settings.databases["memory"].test.name.as_deref(), Some(":memory:"));
		assert_eq!(settings.databases["local"].test.name, None);
		assert_eq!(settings.databases["local"].test_database_name(), ":memory:");
	}

	#[rstest]
	fn test_file_based_sqlite_with_test_name_is_suffixed(mut settings: ProjectSettings) {
		apply_parallel_suffixes(&mut settings, &config(None, Some("gw1")));
		assert_eq!(
			settings.databases["files"].test.name.as_deref(),
			Some("files_test.db_gw1")
		);
	}

	#[rstest]
	fn test_no_sources_is_noop(mut settings: ProjectSettings) {
		let before = settings.clone();
		let applied = apply_parallel_suffixes(&mut settings, &config(None, Some("")));
		assert!(applied.is_empty());
		assert_eq!(settings, before);
	}

	#[rstest]
	#[case("gw0")]
	#[case("gw1")]
	fn test_workers_get_distinct_names(mut settings: ProjectSettings, #[case] worker: &str) {
		apply_parallel_suffixes(&mut settings, &config(None, Some(worker)));
		assert_eq!(
			settings.databases["default"].test.name.as_deref(),
			Some(format!("test_myapp_{}", worker).as_str())
		);
	}
}
