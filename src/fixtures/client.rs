//! Test clients and request factories
//!
//! These are thin delegations: the framework integration decides what a client
//! is, the fixtures only hand out fresh instances.

use crate::error::FixtureResult;

/// Produces the framework's HTTP test doubles
pub trait ClientFactory {
	type Client;
	type AsyncClient;
	type RequestFactory;
	type AsyncRequestFactory;
	type User;

	fn client(&self) -> Self::Client;

	fn async_client(&self) -> Self::AsyncClient;

	fn request_factory(&self) -> Self::RequestFactory;

	fn async_request_factory(&self) -> Self::AsyncRequestFactory;

	/// Authenticate `client` as `user` without going through the login flow
	fn force_login(&self, client: &mut Self::Client, user: &Self::User) -> FixtureResult<()>;
}

/// A fresh test client
pub fn client<F: ClientFactory>(factory: &F) -> F::Client {
	factory.client()
}

pub fn async_client<F: ClientFactory>(factory: &F) -> F::AsyncClient {
	factory.async_client()
}

/// A request factory for calling views directly
pub fn rf<F: ClientFactory>(factory: &F) -> F::RequestFactory {
	factory.request_factory()
}

pub fn async_rf<F: ClientFactory>(factory: &F) -> F::AsyncRequestFactory {
	factory.async_request_factory()
}
