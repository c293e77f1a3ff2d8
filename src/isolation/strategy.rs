//! Isolation strategies and the registry that names them
//!
//! A strategy is the per-test wrapper around the database: class-level setup,
//! per-test pre-setup, per-test post-teardown and class-level teardown. Two
//! strategies ship with the crate:
//!
//! - [`StandardTestCase`] (`reinhardt.test.TestCase`): wraps the test in an
//!   atomic block that is always rolled back. Cheap, but the test never sees a
//!   real commit.
//! - [`TransactionTestCase`] (`reinhardt.test.TransactionTestCase`): lets the
//!   test commit and flushes every table afterwards, optionally resetting
//!   sequences first.
//!
//! Projects can register their own strategies under any name and select them
//! with `--testcase-class` / `--transaction-testcase-class`.

use crate::backend::{AtomicBlock, TestDatabaseBackend};
use crate::config::{DEFAULT_TESTCASE_CLASS, DEFAULT_TRANSACTION_TESTCASE_CLASS, TestConfig};
use crate::error::{FixtureError, FixtureResult};
use crate::isolation::IsolationLevel;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Per-test parameters handed to a strategy factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyConfig {
	/// Rewind auto-increment counters before the test
	pub reset_sequences: bool,
	/// Aliases the test runs against
	pub databases: Vec<String>,
}

/// Lifecycle hooks wrapped around one test
pub trait IsolationStrategy: Send {
	fn class_setup(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()>;

	/// Begin isolation for the test body
	fn pre_setup(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()>;

	/// Undo whatever the test body did
	fn post_teardown(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()>;

	fn class_teardown(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()>;
}

/// Run `op` for every item, keeping the first error but not stopping early
fn for_each_collect<T>(
	items: impl IntoIterator<Item = T>,
	mut op: impl FnMut(T) -> FixtureResult<()>,
) -> FixtureResult<()> {
	let mut first_error = None;
	for item in items {
		if let Err(err) = op(item) {
			first_error.get_or_insert(err);
		}
	}
	first_error.map_or(Ok(()), Err)
}

/// Savepoint isolation: everything the test does is rolled back
///
/// If any selected database cannot roll back, the strategy degrades to
/// flushing those databases after the test, like [`TransactionTestCase`].
#[derive(Debug)]
pub struct StandardTestCase {
	config: StrategyConfig,
	supports_transactions: bool,
	class_atomics: Vec<AtomicBlock>,
	test_atomics: Vec<AtomicBlock>,
}

impl StandardTestCase {
	pub fn new(config: StrategyConfig) -> Self {
		Self {
			config,
			supports_transactions: true,
			class_atomics: Vec::new(),
			test_atomics: Vec::new(),
		}
	}

	fn enter_atomics(
		&self,
		backend: &dyn TestDatabaseBackend,
	) -> FixtureResult<Vec<AtomicBlock>> {
		let mut blocks = Vec::with_capacity(self.config.databases.len());
		for alias in &self.config.databases {
			match backend.begin_atomic(alias) {
				Ok(block) => blocks.push(block),
				Err(err) => {
					// Unwind the blocks opened so far before reporting
					for block in blocks.iter().rev() {
						let _ = backend.rollback_atomic(block);
					}
					return Err(err);
				}
			}
		}
		Ok(blocks)
	}

	fn rollback_atomics(
		backend: &dyn TestDatabaseBackend,
		blocks: Vec<AtomicBlock>,
	) -> FixtureResult<()> {
		for_each_collect(blocks.into_iter().rev(), |block| backend.rollback_atomic(&block))
	}
}

impl IsolationStrategy for StandardTestCase {
	fn class_setup(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		self.supports_transactions = self
			.config
			.databases
			.iter()
			.all(|alias| backend.supports_transactions(alias));
		if !self.supports_transactions {
			tracing::debug!(
				databases = ?self.config.databases,
				"transactions unsupported, falling back to flush isolation"
			);
			return Ok(());
		}
		self.class_atomics = self.enter_atomics(backend)?;
		Ok(())
	}

	fn pre_setup(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		if self.supports_transactions {
			self.test_atomics = self.enter_atomics(backend)?;
		}
		Ok(())
	}

	fn post_teardown(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		if self.supports_transactions {
			return Self::rollback_atomics(backend, std::mem::take(&mut self.test_atomics));
		}
		for_each_collect(&self.config.databases, |alias| {
			backend.flush(alias, false)?;
			backend.close_connection(alias)
		})
	}

	fn class_teardown(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		Self::rollback_atomics(backend, std::mem::take(&mut self.class_atomics))
	}
}

/// Flush isolation: the test commits for real and every table is emptied after
#[derive(Debug)]
pub struct TransactionTestCase {
	config: StrategyConfig,
}

impl TransactionTestCase {
	pub fn new(config: StrategyConfig) -> Self {
		Self { config }
	}
}

impl IsolationStrategy for TransactionTestCase {
	fn class_setup(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		Ok(())
	}

	fn pre_setup(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		if !self.config.reset_sequences {
			return Ok(());
		}
		for alias in &self.config.databases {
			backend.reset_sequences(alias)?;
		}
		Ok(())
	}

	fn post_teardown(&mut self, backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		for_each_collect(&self.config.databases, |alias| {
			backend.flush(alias, false)?;
			backend.close_connection(alias)
		})
	}

	fn class_teardown(&mut self, _backend: &dyn TestDatabaseBackend) -> FixtureResult<()> {
		Ok(())
	}
}

/// Builds a strategy for one test
pub type StrategyFactory = Arc<dyn Fn(StrategyConfig) -> Box<dyn IsolationStrategy> + Send + Sync>;

/// Named strategy factories
///
/// # Examples
///
/// ```
/// use reinhardt_testdb::isolation::strategy::{StrategyRegistry, TransactionTestCase};
///
/// let mut registry = StrategyRegistry::new();
/// registry.register("myapp.tests.LiveCase", |config| Box::new(TransactionTestCase::new(config)));
///
/// assert!(registry.contains("reinhardt.test.TestCase"));
/// assert!(registry.contains("myapp.tests.LiveCase"));
/// assert!(registry.resolve("myapp.tests.Missing", "testcase_class").is_err());
/// ```
#[derive(Clone)]
pub struct StrategyRegistry {
	factories: IndexMap<String, StrategyFactory>,
}

impl StrategyRegistry {
	/// Registry holding the two built-in strategies
	pub fn new() -> Self {
		let mut registry = Self {
			factories: IndexMap::new(),
		};
		registry.register(DEFAULT_TESTCASE_CLASS, |config| {
			Box::new(StandardTestCase::new(config))
		});
		registry.register(DEFAULT_TRANSACTION_TESTCASE_CLASS, |config| {
			Box::new(TransactionTestCase::new(config))
		});
		registry
	}

	/// Register or replace a strategy under `name`
	pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
	where
		F: Fn(StrategyConfig) -> Box<dyn IsolationStrategy> + Send + Sync + 'static,
	{
		self.factories.insert(name.into(), Arc::new(factory));
		self
	}

	pub fn contains(&self, name: &str) -> bool {
		self.factories.contains_key(name)
	}

	/// Look up `name`, reporting the setting that asked for it on failure
	pub fn resolve(&self, name: &str, setting: &str) -> FixtureResult<StrategyFactory> {
		self.factories
			.get(name)
			.cloned()
			.ok_or_else(|| FixtureError::UnknownTestCase {
				name: name.to_string(),
				setting: setting.to_string(),
			})
	}
}

impl Default for StrategyRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for StrategyRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.factories.keys()).finish()
	}
}

/// The two factories a session uses, resolved once at startup
#[derive(Clone)]
pub struct ResolvedStrategies {
	plain_name: String,
	plain: StrategyFactory,
	transactional_name: String,
	transactional: StrategyFactory,
}

impl ResolvedStrategies {
	/// Resolve the configured names, failing fast on unknown ones
	pub fn resolve(registry: &StrategyRegistry, config: &TestConfig) -> FixtureResult<Self> {
		let plain_name = config.testcase_class().to_string();
		let transactional_name = config.transaction_testcase_class().to_string();
		Ok(Self {
			plain: registry.resolve(&plain_name, "testcase_class")?,
			plain_name,
			transactional: registry.resolve(&transactional_name, "transaction_testcase_class")?,
			transactional_name,
		})
	}

	/// Name and factory serving `level`
	pub fn for_level(&self, level: IsolationLevel) -> (&str, &StrategyFactory) {
		if level.is_transactional() {
			(&self.transactional_name, &self.transactional)
		} else {
			(&self.plain_name, &self.plain)
		}
	}
}

impl fmt::Debug for ResolvedStrategies {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResolvedStrategies")
			.field("plain", &self.plain_name)
			.field("transactional", &self.transactional_name)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock::{BackendEvent, RecordingBackend};
	use rstest::{fixture, rstest};

	#[fixture]
	fn backend() -> Arc<RecordingBackend> {
		let backend = RecordingBackend::new();
		backend.blocker().unblock();
		backend
	}

	fn config(reset_sequences: bool, databases: &[&str]) -> StrategyConfig {
		StrategyConfig {
			reset_sequences,
			databases: databases.iter().map(|a| a.to_string()).collect(),
		}
	}

	#[rstest]
	fn test_standard_nests_class_and_test_atomics(backend: Arc<RecordingBackend>) {
		let mut strategy = StandardTestCase::new(config(false, &["default", "replica"]));

		strategy.class_setup(&*backend).unwrap();
		strategy.pre_setup(&*backend).unwrap();
		strategy.post_teardown(&*backend).unwrap();
		strategy.class_teardown(&*backend).unwrap();

		assert_eq!(
			backend.events(),
			vec![
				BackendEvent::BeginAtomic { alias: "default".into(), depth: 1 },
				BackendEvent::BeginAtomic { alias: "replica".into(), depth: 1 },
				BackendEvent::BeginAtomic { alias: "default".into(), depth: 2 },
				BackendEvent::BeginAtomic { alias: "replica".into(), depth: 2 },
				BackendEvent::RollbackAtomic { alias: "replica".into(), depth: 2 },
				BackendEvent::RollbackAtomic { alias: "default".into(), depth: 2 },
				BackendEvent::RollbackAtomic { alias: "replica".into(), depth: 1 },
				BackendEvent::RollbackAtomic { alias: "default".into(), depth: 1 },
			]
		);
	}

	#[rstest]
	fn test_standard_falls_back_to_flush(backend: Arc<RecordingBackend>) {
		backend.set_supports_transactions("default", false);
		let mut strategy = StandardTestCase::new(config(false, &["default"]));

		strategy.class_setup(&*backend).unwrap();
		strategy.pre_setup(&*backend).unwrap();
		strategy.post_teardown(&*backend).unwrap();
		strategy.class_teardown(&*backend).unwrap();

		assert_eq!(
			backend.events(),
			vec![
				BackendEvent::Flush { alias: "default".into(), reset_sequences: false },
				BackendEvent::CloseConnection { alias: "default".into() },
			]
		);
	}

	#[rstest]
	fn test_transaction_case_resets_then_flushes(backend: Arc<RecordingBackend>) {
		let mut strategy = TransactionTestCase::new(config(true, &["default"]));

		strategy.class_setup(&*backend).unwrap();
		strategy.pre_setup(&*backend).unwrap();
		strategy.post_teardown(&*backend).unwrap();
		strategy.class_teardown(&*backend).unwrap();

		assert_eq!(
			backend.events(),
			vec![
				BackendEvent::ResetSequences { alias: "default".into() },
				BackendEvent::Flush { alias: "default".into(), reset_sequences: false },
				BackendEvent::CloseConnection { alias: "default".into() },
			]
		);
	}

	#[rstest]
	fn test_transaction_case_without_reset_skips_sequences(backend: Arc<RecordingBackend>) {
		let mut strategy = TransactionTestCase::new(config(false, &["default"]));
		strategy.pre_setup(&*backend).unwrap();
		assert!(backend.events().is_empty());
	}

	#[rstest]
	fn test_resolved_strategies_pick_by_level() {
		let registry = StrategyRegistry::new();
		let resolved = ResolvedStrategies::resolve(&registry, &TestConfig::default()).unwrap();

		assert_eq!(resolved.for_level(IsolationLevel::Plain).0, DEFAULT_TESTCASE_CLASS);
		assert_eq!(
			resolved.for_level(IsolationLevel::TransactionalResetSeq).0,
			DEFAULT_TRANSACTION_TESTCASE_CLASS
		);
	}

	#[rstest]
	fn test_unknown_transaction_class_names_setting() {
		let registry = StrategyRegistry::new();
		let config = TestConfig {
			transaction_testcase_class: Some("myapp.tests.Gone".to_string()),
			..TestConfig::default()
		};

		let err = ResolvedStrategies::resolve(&registry, &config).unwrap_err();
		assert!(matches!(
			err,
			FixtureError::UnknownTestCase { ref name, ref setting }
				if name == "myapp.tests.Gone" && setting == "transaction_testcase_class"
		));
	}
}
