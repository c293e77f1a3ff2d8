//! Live server collaborator
//!
//! The fixtures never run an HTTP server themselves. A framework integration
//! supplies a [`LiveServerFactory`] on the session builder; the session starts
//! one server on first use, keeps it for every later test and stops it when the
//! session finishes.
//!
//! Tests that use the live server always get transactional database isolation:
//! data written inside a rolled-back savepoint would be invisible to the
//! server's own connections.

use crate::error::FixtureResult;
use std::sync::Arc;

/// A running server shared by the whole session
pub trait LiveServer: Send + Sync {
	/// Base URL, e.g. `http://localhost:41235`
	fn url(&self) -> String;

	/// Apply the settings the server needs while a test talks to it
	fn enable_modified_settings(&self) -> FixtureResult<()>;

	/// Revert [`enable_modified_settings`](Self::enable_modified_settings)
	fn disable_modified_settings(&self) -> FixtureResult<()>;

	fn stop(&self) -> FixtureResult<()>;
}

/// Starts a [`LiveServer`] bound to an address
pub trait LiveServerFactory: Send + Sync {
	/// `address` comes from `--liveserver`, `REINHARDT_LIVE_TEST_SERVER_ADDRESS`
	/// or `localhost`, in that order
	fn start(&self, address: &str) -> FixtureResult<Arc<dyn LiveServer>>;
}
