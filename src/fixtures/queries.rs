//! Query-count assertions
//!
//! Wrap a block of code and fail the test when it runs more (or a different
//! number of) statements than expected. Query logging is forced on for the
//! block and restored afterwards, even when the block panics.
//!
//! A failure panics with a message of the form
//!
//! ```text
//! Expected to perform 2 queries but 3 were done (add -v option to show queries)
//! ```
//!
//! With `-v`, the executed SQL is listed instead of the hint.

use crate::backend::{CapturedQuery, TestDatabaseBackend};
use crate::request::TestRequest;
use crate::settings::DEFAULT_DB_ALIAS;

/// Builder for a query-count check
///
/// # Examples
///
/// ```
/// use reinhardt_testdb::fixtures::queries::QueryCountAssertion;
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
/// QueryCountAssertion::at_most(&request, 2)
///     .info("loading the poll page")
///     .run(|| {
///         backend.execute("default", "SELECT * FROM polls_question").unwrap();
///     });
/// ```
#[derive(Debug)]
pub struct QueryCountAssertion<'a> {
	request: &'a TestRequest,
	expected: usize,
	exact: bool,
	alias: String,
	info: Option<String>,
	verbose: bool,
}

impl<'a> QueryCountAssertion<'a> {
	/// Require exactly `expected` statements
	pub fn exact(request: &'a TestRequest, expected: usize) -> Self {
		Self::new(request, expected, true)
	}

	/// Allow at most `expected` statements
	pub fn at_most(request: &'a TestRequest, expected: usize) -> Self {
		Self::new(request, expected, false)
	}

	fn new(request: &'a TestRequest, expected: usize, exact: bool) -> Self {
		Self {
			request,
			expected,
			exact,
			alias: DEFAULT_DB_ALIAS.to_string(),
			info: None,
			verbose: request.session().config().is_verbose(),
		}
	}

	/// Count statements on `alias` instead of `default`
	pub fn using(mut self, alias: impl Into<String>) -> Self {
		self.alias = alias.into();
		self
	}

	/// Extra line appended to the failure message
	pub fn info(mut self, info: impl Into<String>) -> Self {
		self.info = Some(info.into());
		self
	}

	/// List the executed SQL on failure regardless of `-v`
	pub fn verbose(mut self, verbose: bool) -> Self {
		self.verbose = verbose;
		self
	}

	/// Run `f`, then panic if the statement count is off
	pub fn run<T>(self, f: impl FnOnce() -> T) -> T {
		let backend = self.request.session().backend();
		let (result, queries) = {
			let _logging = ForcedLogging::enable(&**backend, &self.alias);
			let start = backend.captured_queries(&self.alias).len();
			let result = f();
			let queries: Vec<CapturedQuery> = backend
				.captured_queries(&self.alias)
				.into_iter()
				.skip(start)
				.collect();
			(result, queries)
		};

		if let Some(message) = self.failure_message(&queries) {
			panic!("{}", message);
		}
		result
	}

	/// Failure message for `queries`, or `None` when the count is acceptable
	pub fn failure_message(&self, queries: &[CapturedQuery]) -> Option<String> {
		let performed = queries.len();
		let failed = if self.exact {
			performed != self.expected
		} else {
			performed > self.expected
		};
		if !failed {
			return None;
		}

		let done = if performed == 1 {
			"1 was".to_string()
		} else {
			format!("{} were", performed)
		};
		let mut message = format!(
			"Expected to perform {} queries {}but {} done",
			self.expected,
			if self.exact { "" } else { "or less " },
			done
		);
		if let Some(info) = &self.info {
			message.push('\n');
			message.push_str(info);
		}
		if self.verbose {
			message.push_str("\n\nQueries:\n========\n\n");
			let sqls: Vec<&str> = queries.iter().map(|q| q.sql.as_str()).collect();
			message.push_str(&sqls.join("\n\n"));
		} else {
			message.push_str(" (add -v option to show queries)");
		}
		Some(message)
	}
}

/// Assert that `f` performs exactly `expected` statements on `default`
pub fn assert_num_queries<T>(request: &TestRequest, expected: usize, f: impl FnOnce() -> T) -> T {
	QueryCountAssertion::exact(request, expected).run(f)
}

/// Assert that `f` performs at most `expected` statements on `default`
pub fn assert_max_num_queries<T>(
	request: &TestRequest,
	expected: usize,
	f: impl FnOnce() -> T,
) -> T {
	QueryCountAssertion::at_most(request, expected).run(f)
}

struct ForcedLogging<'a> {
	log: &'a dyn TestDatabaseBackend,
	alias: &'a str,
	previous: bool,
}

impl<'a> ForcedLogging<'a> {
	fn enable(log: &'a dyn TestDatabaseBackend, alias: &'a str) -> Self {
		let previous = log.force_query_logging(alias, true);
		Self {
			log,
			alias,
			previous,
		}
	}
}

impl Drop for ForcedLogging<'_> {
	fn drop(&mut self) {
		self.log.force_query_logging(self.alias, self.previous);
	}
}
