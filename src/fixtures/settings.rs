//! Per-test settings overrides
//!
//! [`SettingsWrapper`] reads project settings through the framework's
//! [`SettingsOverride`] hook and records every change it makes. When the test
//! finishes, the changes are disabled newest first, so a key that was set
//! twice ends up with its original value.

use crate::error::FixtureResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The framework's override mechanism
pub trait SettingsOverride: Send + Sync {
	/// Current value of `key`, or `None` when it is not set
	fn get(&self, key: &str) -> Option<Value>;

	/// Push an override for `key`; `None` hides the setting entirely
	fn enable(&self, key: &str, value: Option<Value>) -> FixtureResult<()>;

	/// Pop the most recent override of `key`
	fn disable(&self, key: &str) -> FixtureResult<()>;
}

/// Settings access that undoes its changes when finalized
///
/// # Examples
///
/// ```
/// use reinhardt_testdb::fixtures::settings::{SettingsOverride, SettingsWrapper};
/// use reinhardt_testdb::FixtureResult;
/// use parking_lot::Mutex;
/// use serde_json::{Value, json};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct Layers(Mutex<Vec<(String, Option<Value>)>>);
///
/// impl SettingsOverride for Layers {
///     fn get(&self, key: &str) -> Option<Value> {
///         let layers = self.0.lock();
///         layers.iter().rev().find(|(k, _)| k == key).and_then(|(_, v)| v.clone())
///     }
///     fn enable(&self, key: &str, value: Option<Value>) -> FixtureResult<()> {
///         self.0.lock().push((key.to_string(), value));
///         Ok(())
///     }
///     fn disable(&self, key: &str) -> FixtureResult<()> {
///         let mut layers = self.0.lock();
///         if let Some(pos) = layers.iter().rposition(|(k, _)| k == key) {
///             layers.remove(pos);
///         }
///         Ok(())
///     }
/// }
///
/// let wrapper = SettingsWrapper::new(Arc::new(Layers::default()));
/// wrapper.set("DEBUG", json!(true)).unwrap();
/// assert_eq!(wrapper.get("DEBUG"), Some(json!(true)));
///
/// wrapper.finalize().unwrap();
/// assert_eq!(wrapper.get("DEBUG"), None);
/// ```
pub struct SettingsWrapper {
	backend: Arc<dyn SettingsOverride>,
	to_restore: Mutex<Vec<String>>,
}

impl SettingsWrapper {
	pub fn new(backend: Arc<dyn SettingsOverride>) -> Self {
		Self {
			backend,
			to_restore: Mutex::new(Vec::new()),
		}
	}

	pub fn get(&self, key: &str) -> Option<Value> {
		self.backend.get(key)
	}

	/// Override `key` until the wrapper is finalized
	pub fn set(&self, key: &str, value: impl Into<Value>) -> FixtureResult<()> {
		self.backend.enable(key, Some(value.into()))?;
		self.to_restore.lock().push(key.to_string());
		Ok(())
	}

	/// Hide `key` until the wrapper is finalized
	pub fn delete(&self, key: &str) -> FixtureResult<()> {
		self.backend.enable(key, None)?;
		self.to_restore.lock().push(key.to_string());
		Ok(())
	}

	/// Number of overrides still active
	pub fn pending(&self) -> usize {
		self.to_restore.lock().len()
	}

	/// Disable every override, newest first
	///
	/// All overrides are disabled even if one fails; the first error is
	/// returned.
	pub fn finalize(&self) -> FixtureResult<()> {
		let keys = std::mem::take(&mut *self.to_restore.lock());
		let mut first_error = None;
		for key in keys.iter().rev() {
			if let Err(err) = self.backend.disable(key) {
				first_error.get_or_insert(err);
			}
		}
		first_error.map_or(Ok(()), Err)
	}
}

impl fmt::Debug for SettingsWrapper {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SettingsWrapper")
			.field("to_restore", &*self.to_restore.lock())
			.finish_non_exhaustive()
	}
}
