//! Capturing on-commit callbacks
//!
//! Under savepoint isolation the test transaction never commits, so callbacks
//! registered with "run on commit" never fire. Capturing snapshots the
//! connection's pending list, runs the block and returns the callbacks that
//! were added meanwhile, optionally executing them.

use crate::backend::{OnCommitCallback, TestDatabaseBackend};
use crate::request::TestRequest;
use crate::settings::DEFAULT_DB_ALIAS;

/// Run `f` and collect the on-commit callbacks it queued on `alias`
///
/// With `execute`, the captured callbacks are called in order. Callbacks
/// queued by those callbacks are captured and executed too, until no new
/// ones appear.
///
/// # Examples
///
/// ```
/// use reinhardt_testdb::backend::OnCommitCallback;
/// use reinhardt_testdb::fixtures::on_commit::capture_on_commit_callbacks;
/// use reinhardt_testdb::mock::RecordingBackend;
/// use reinhardt_testdb::session::TestSession;
/// use reinhardt_testdb::settings::{DatabaseConfig, ProjectSettings};
///
/// let backend = RecordingBackend::new();
/// let session = TestSession::builder(backend.clone())
///     .settings(ProjectSettings::new().with_database("default", DatabaseConfig::sqlite("app.db")))
///     .build()
///     .unwrap();
/// let mut request = session.request();
/// request.db().unwrap();
///
/// let ((), callbacks) = capture_on_commit_callbacks(&request, None, false, || {
///     backend.on_commit("default", OnCommitCallback::new("send_welcome_email", || {}));
/// });
/// assert_eq!(callbacks.len(), 1);
/// assert_eq!(callbacks[0].name(), "send_welcome_email");
/// ```
pub fn capture_on_commit_callbacks<T>(
	request: &TestRequest,
	alias: Option<&str>,
	execute: bool,
	f: impl FnOnce() -> T,
) -> (T, Vec<OnCommitCallback>) {
	let alias = alias.unwrap_or(DEFAULT_DB_ALIAS);
	let hooks: &dyn TestDatabaseBackend = &**request.session().backend();

	let mut start = hooks.pending_on_commit(alias).len();
	let result = f();

	let mut captured = Vec::new();
	loop {
		let pending = hooks.pending_on_commit(alias);
		let seen = pending.len();
		for callback in pending.into_iter().skip(start) {
			if execute {
				tracing::debug!(callback = callback.name(), "executing captured on-commit callback");
				callback.call();
			}
			captured.push(callback);
		}
		if !execute || hooks.pending_on_commit(alias).len() == seen {
			break;
		}
		start = seen;
	}

	(result, captured)
}
