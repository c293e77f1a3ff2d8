//! Test logging
//!
//! The crate logs through `tracing`. With no `tracing` subscriber installed,
//! events are forwarded to the `log` facade, so [`init_test_logging`] only has
//! to install `env_logger`. Without `RUST_LOG`, warnings from this crate are
//! shown (teardown failures, failed activations); set
//! `RUST_LOG=reinhardt_testdb=debug` to follow gate transitions and finalizers.

use env_logger::Env;
use std::sync::Once;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "reinhardt_testdb=warn";

static INIT: Once = Once::new();

/// Install the test logger for this process
///
/// Called by [`recording_backend`](crate::mock::recording_backend) and
/// [`test_config`](crate::fixtures::test_config); calling it again is a no-op.
/// Output goes through the harness's capture, so it only shows for failing
/// tests or with `--nocapture`.
///
/// # Examples
///
/// ```
/// use reinhardt_testdb::logging::init_test_logging;
///
/// init_test_logging();
/// init_test_logging();
/// ```
pub fn init_test_logging() {
	INIT.call_once(|| {
		let env = Env::default().default_filter_or(DEFAULT_FILTER);
		if let Err(err) = env_logger::Builder::from_env(env).is_test(true).try_init() {
			// Another logger was installed first; keep it
			tracing::debug!(error = %err, "test logger not installed");
		}
	});
}
