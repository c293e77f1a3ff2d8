//! LIFO teardown stack shared by requests and sessions

use crate::error::{FixtureError, FixtureResult};

type FinalizerFn = Box<dyn FnOnce() -> FixtureResult<()> + Send>;

struct Finalizer {
	name: String,
	func: FinalizerFn,
}

/// Outcome of running a [`FinalizerStack`]
#[derive(Debug, Default)]
pub struct FinalizerReport {
	/// Names in the order they ran
	pub executed: Vec<String>,
	/// Failures, in the order they happened
	pub errors: Vec<FixtureError>,
}

impl FinalizerReport {
	pub fn is_ok(&self) -> bool {
		self.errors.is_empty()
	}

	/// Turn the report into the first failure, wrapped with its finalizer name
	pub fn into_result(self) -> FixtureResult<Vec<String>> {
		match self.errors.into_iter().next() {
			Some(err) => Err(err),
			None => Ok(self.executed),
		}
	}
}

/// Teardown callbacks released in reverse order of registration
///
/// Every callback runs even when an earlier one fails.
#[derive(Default)]
pub struct FinalizerStack {
	stack: Vec<Finalizer>,
}

impl FinalizerStack {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(
		&mut self,
		name: impl Into<String>,
		func: impl FnOnce() -> FixtureResult<()> + Send + 'static,
	) {
		self.stack.push(Finalizer {
			name: name.into(),
			func: Box::new(func),
		});
	}

	pub fn len(&self) -> usize {
		self.stack.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stack.is_empty()
	}

	/// Detach every finalizer registered after the first `len`
	pub fn split_off(&mut self, len: usize) -> FinalizerStack {
		let at = len.min(self.stack.len());
		FinalizerStack {
			stack: self.stack.split_off(at),
		}
	}

	/// Names of pending finalizers in registration order
	pub fn names(&self) -> Vec<&str> {
		self.stack.iter().map(|f| f.name.as_str()).collect()
	}

	/// Run and drain every finalizer, newest first
	pub fn run(&mut self) -> FinalizerReport {
		let mut report = FinalizerReport::default();
		while let Some(finalizer) = self.stack.pop() {
			tracing::debug!(finalizer = %finalizer.name, "running finalizer");
			if let Err(err) = (finalizer.func)() {
				tracing::debug!(finalizer = %finalizer.name, error = %err, "finalizer failed");
				report.errors.push(FixtureError::Finalizer {
					name: finalizer.name.clone(),
					source: Box::new(err),
				});
			}
			report.executed.push(finalizer.name);
		}
		report
	}
}

impl std::fmt::Debug for FinalizerStack {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FinalizerStack")
			.field("pending", &self.names())
			.finish()
	}
}
