//! Error types for test database fixtures

use crate::isolation::IsolationLevel;

/// Errors raised while setting up or tearing down database fixtures
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
	/// A configured test case name has no registered isolation strategy
	#[error(
		"Could not resolve '{name}' for setting '{setting}': no test case strategy is registered under that name"
	)]
	UnknownTestCase { name: String, setting: String },

	/// Database access was attempted while the blocker gate was closed
	#[error(
		"Database access not allowed ({operation}), use the \"db\" or \"transactional_db\" fixture to enable it"
	)]
	DatabaseAccessBlocked { operation: String },

	/// `restore()` was called more often than the blocker was changed
	#[error("Database blocker restored more times than it was blocked or unblocked")]
	BlockerUnderflow,

	/// A test selected a database alias that is not configured
	#[error("Database '{0}' is not configured in the project settings")]
	UnknownDatabase(String),

	/// Session-level database setup failed
	#[error("Test database setup failed: {0}")]
	Setup(String),

	/// A framework database primitive failed
	#[error("Database operation failed on '{alias}': {message}")]
	Database { alias: String, message: String },

	/// Isolation was already activated at a lower level for this test
	#[error(
		"Database isolation {active:?} is already active for this test; cannot switch to {requested:?}"
	)]
	IsolationConflict {
		active: IsolationLevel,
		requested: IsolationLevel,
	},

	/// An earlier activation on this request failed after the gate was opened
	#[error("Database isolation could not be activated for this test: {0}")]
	ActivationFailed(String),

	/// The session was built without a live server factory
	#[error("Live server requested but no live server factory is configured for this session")]
	LiveServerUnavailable,

	/// The live server collaborator reported a failure
	#[error("Live server error: {0}")]
	LiveServer(String),

	#[error(transparent)]
	Config(#[from] ConfigError),

	/// A finalizer failed while the test was being torn down
	#[error("Finalizer '{name}' failed: {source}")]
	Finalizer {
		name: String,
		#[source]
		source: Box<FixtureError>,
	},
}

impl FixtureError {
	/// Shorthand for a failed database primitive
	pub fn database(alias: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Database {
			alias: alias.into(),
			message: message.into(),
		}
	}
}

/// Errors raised while loading fixture configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Invalid test options: {0}")]
	Args(#[from] clap::Error),

	#[error("Invalid settings file: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("Could not read settings file '{path}': {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
}

pub type FixtureResult<T> = Result<T, FixtureError>;
