//! Supporting fixtures built on a [`TestRequest`](crate::request::TestRequest)
//!
//! - [`client`]: test clients and request factories
//! - [`auth`]: the admin user and a client logged in as it
//! - [`settings`]: settings overrides undone after the test
//! - [`live_server`]: the session's live server collaborator
//! - [`queries`]: query-count assertions
//! - [`on_commit`]: capturing on-commit callbacks

pub mod auth;
pub mod client;
pub mod live_server;
pub mod on_commit;
pub mod queries;
pub mod settings;

pub use auth::{UserModel, admin_client, admin_user};
pub use client::{ClientFactory, async_client, async_rf, client, rf};
pub use live_server::{LiveServer, LiveServerFactory};
pub use on_commit::capture_on_commit_callbacks;
pub use queries::{QueryCountAssertion, assert_max_num_queries, assert_num_queries};
pub use settings::{SettingsOverride, SettingsWrapper};

use crate::config::TestConfig;
use rstest::fixture;

/// Options read from the environment
///
/// Invalid values are logged and replaced by the defaults.
#[fixture]
pub fn test_config() -> TestConfig {
	crate::logging::init_test_logging();
	TestConfig::from_env().unwrap_or_else(|err| {
		tracing::warn!(error = %err, "ignoring invalid test options");
		TestConfig::default()
	})
}
