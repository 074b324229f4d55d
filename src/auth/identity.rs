//! Machine identity used as key material for the encrypted token store.

const UNKNOWN: &str = "unknown";

/// Hostname and username pair that binds the token file to one account on one machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineIdentity {
	/// Machine hostname.
	pub hostname: String,
	/// Login name of the current user.
	pub username: String,
}
impl MachineIdentity {
	/// Creates an explicit identity.
	pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
		Self { hostname: hostname.into(), username: username.into() }
	}

	/// Discovers the identity from the running environment.
	///
	/// Unresolvable parts fall back to `"unknown"` so discovery never fails.
	pub fn discover() -> Self {
		Self { hostname: discover_hostname(), username: discover_username() }
	}

	/// PBKDF2 password input, `"{hostname}:{username}"`.
	pub fn key_material(&self) -> String {
		format!("{}:{}", self.hostname, self.username)
	}
}

fn discover_hostname() -> String {
	hostname::get()
		.ok()
		.and_then(|name| non_empty(name.to_string_lossy().into_owned()))
		.unwrap_or_else(|| UNKNOWN.into())
}

fn discover_username() -> String {
	whoami::fallible::username_os()
		.ok()
		.and_then(|name| non_empty(name.to_string_lossy().into_owned()))
		.unwrap_or_else(|| UNKNOWN.into())
}

fn non_empty(value: String) -> Option<String> {
	let trimmed = value.trim();

	(!trimmed.is_empty()).then(|| trimmed.to_owned())
}
