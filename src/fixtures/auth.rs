//! Admin user fixtures
//!
//! [`admin_user`] looks up the conventional admin account and creates it when
//! it is missing. The account name depends on the user model: models keyed by
//! email use `admin@example.com`, everything else uses `admin`. A created
//! account always has the password `password`.

use crate::error::FixtureResult;
use crate::fixtures::client::ClientFactory;
use crate::request::TestRequest;
use indexmap::IndexMap;

/// Username of the admin account for models not keyed by email
pub const ADMIN_USERNAME: &str = "admin";

pub const ADMIN_EMAIL: &str = "admin@example.com";

/// Password given to a newly created admin account
pub const ADMIN_PASSWORD: &str = "password";

/// The project's user model
pub trait UserModel {
	type User;

	/// Field holding the login name, e.g. `username` or `email`
	fn username_field(&self) -> String;

	/// Fields that must be supplied when creating a superuser
	fn required_fields(&self) -> Vec<String>;

	/// Look up a user by login name
	fn get_by_natural_key(&self, username: &str) -> FixtureResult<Option<Self::User>>;

	/// Create a superuser from field values, including `password`
	fn create_superuser(&self, fields: IndexMap<String, String>) -> FixtureResult<Self::User>;
}

/// Login name of the admin account for a model keyed by `username_field`
///
/// ```
/// use reinhardt_testdb::fixtures::auth::admin_username;
///
/// assert_eq!(admin_username("username"), "admin");
/// assert_eq!(admin_username("email"), "admin@example.com");
/// ```
pub fn admin_username(username_field: &str) -> &'static str {
	if username_field == "email" {
		ADMIN_EMAIL
	} else {
		ADMIN_USERNAME
	}
}

/// The admin user, created on first use
///
/// Requires database access and activates the `db` fixture on `request`.
pub fn admin_user<M: UserModel>(request: &mut TestRequest, model: &M) -> FixtureResult<M::User> {
	request.db()?;

	let username_field = model.username_field();
	let username = admin_username(&username_field);
	if let Some(user) = model.get_by_natural_key(username)? {
		return Ok(user);
	}

	let mut fields = IndexMap::new();
	if model.required_fields().iter().any(|field| field == "email") {
		fields.insert("email".to_string(), ADMIN_EMAIL.to_string());
	}
	fields.insert("password".to_string(), ADMIN_PASSWORD.to_string());
	fields.insert(username_field, username.to_string());
	tracing::debug!(username, "creating admin user");
	model.create_superuser(fields)
}

/// A client logged in as [`admin_user`]
pub fn admin_client<M, F>(request: &mut TestRequest, model: &M, factory: &F) -> FixtureResult<F::Client>
where
	M: UserModel,
	F: ClientFactory<User = M::User>,
{
	let user = admin_user(request, model)?;
	let mut client = factory.client();
	factory.force_login(&mut client, &user)?;
	Ok(client)
}
