//! Broker configuration: client credentials, platform endpoints, and session tuning knobs.

// std
use std::{
	env,
	net::{IpAddr, Ipv4Addr, Ipv6Addr},
};
// self
use crate::{_prelude::*, auth::TokenSecret, error::ConfigError};

/// Environment variable carrying the connected app's client id.
pub const ENV_CLIENT_ID: &str = "ANYPOINT_CLIENT_ID";
/// Environment variable carrying the connected app's client secret.
pub const ENV_CLIENT_SECRET: &str = "ANYPOINT_CLIENT_SECRET";
/// Environment variable overriding the redirect URI.
pub const ENV_REDIRECT_URI: &str = "ANYPOINT_REDIRECT_URI";
/// Environment variable overriding the platform base URL.
pub const ENV_BASE_URL: &str = "ANYPOINT_BASE_URL";
/// Environment variable overriding the token file location.
pub const ENV_TOKEN_PATH: &str = "ANYPOINT_TOKEN_PATH";

/// Platform root used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://anypoint.mulesoft.com";
/// Redirect URI registered for the loopback listener by default.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/api/callback";
/// Scopes requested during authorization.
pub const SCOPES: &str = "full offline_access";

const APP_DIR: &str = "anypoint-broker";
const TOKEN_FILE: &str = "tokens.json";
const AUTHORIZE_PATH: &str = "accounts/api/v2/oauth2/authorize";
const TOKEN_PATH: &str = "accounts/api/v2/oauth2/token";

/// Fully resolved broker configuration.
#[derive(Clone, Debug)]
pub struct Config {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: TokenSecret,
	/// Platform root every API path is resolved against.
	pub base_url: Url,
	/// Redirect URI sent to the provider.
	pub redirect_uri: Url,
	/// Loopback port and path derived from [`Config::redirect_uri`].
	pub callback: CallbackTarget,
	/// Derived OAuth endpoints.
	pub endpoints: Endpoints,
	/// Location of the encrypted token file.
	pub token_path: PathBuf,
	/// Window before expiry in which the access token is refreshed proactively.
	pub refresh_buffer: Duration,
	/// How long the loopback listener waits for the browser.
	pub callback_timeout: StdDuration,
	/// Per-request timeout applied by the HTTP client.
	pub request_timeout: StdDuration,
	/// Maximum number of platform calls in flight.
	pub max_concurrent: usize,
	/// Dispatch cadence ceiling for platform calls.
	pub requests_per_minute: u32,
	/// TTL for cached reads that do not pass their own.
	pub cache_ttl: StdDuration,
}
impl Config {
	/// Returns a builder seeded with defaults and the provided credentials.
	pub fn builder(client_id: impl Into<String>, client_secret: impl Into<String>) -> ConfigBuilder {
		ConfigBuilder::new(client_id.into(), client_secret.into())
	}

	/// Reads configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| env::var(key).ok())
	}

	/// Reads configuration through `lookup`, treating blank values as unset.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let read = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let client_id = read(ENV_CLIENT_ID).ok_or(ConfigError::MissingClientId)?;
		let client_secret = read(ENV_CLIENT_SECRET).ok_or(ConfigError::MissingClientSecret)?;
		let mut builder = Self::builder(client_id, client_secret);

		if let Some(base) = read(ENV_BASE_URL) {
			builder = builder.base_url(&base)?;
		}
		if let Some(redirect) = read(ENV_REDIRECT_URI) {
			builder = builder.redirect_uri(&redirect)?;
		}
		if let Some(path) = read(ENV_TOKEN_PATH) {
			builder = builder.token_path(path);
		}

		builder.build()
	}

	/// Resolves `path` against the platform base URL.
	pub fn url(&self, path: &str) -> Result<Url, ConfigError> {
		join(&self.base_url, "base_url", path)
	}

	/// Builds the HTTP client shared by OAuth and API calls.
	///
	/// Redirects are never followed; token and API endpoints answer directly.
	pub fn http_client(&self) -> Result<ReqwestClient, ConfigError> {
		ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.timeout(self.request_timeout)
			.user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
			.build()
			.map_err(ConfigError::http_client_build)
	}
}

/// Builder for [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
	client_id: String,
	client_secret: TokenSecret,
	base_url: Option<Url>,
	redirect_uri: Option<Url>,
	token_path: Option<PathBuf>,
	refresh_buffer: Duration,
	callback_timeout: StdDuration,
	request_timeout: StdDuration,
	max_concurrent: usize,
	requests_per_minute: u32,
	cache_ttl: StdDuration,
}
impl ConfigBuilder {
	fn new(client_id: String, client_secret: String) -> Self {
		Self {
			client_id,
			client_secret: TokenSecret::new(client_secret),
			base_url: None,
			redirect_uri: None,
			token_path: None,
			refresh_buffer: Duration::minutes(5),
			callback_timeout: StdDuration::from_secs(5 * 60),
			request_timeout: StdDuration::from_secs(30),
			max_concurrent: 10,
			requests_per_minute: 100,
			cache_ttl: StdDuration::from_secs(60),
		}
	}

	/// Overrides the platform base URL.
	pub fn base_url(mut self, url: &str) -> Result<Self, ConfigError> {
		self.base_url = Some(parse("base_url", url)?);

		Ok(self)
	}

	/// Overrides the redirect URI served by the loopback listener.
	pub fn redirect_uri(mut self, url: &str) -> Result<Self, ConfigError> {
		self.redirect_uri = Some(parse("redirect_uri", url)?);

		Ok(self)
	}

	/// Overrides the token file location.
	pub fn token_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.token_path = Some(path.into());

		self
	}

	/// Overrides the proactive refresh window.
	pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = buffer;

		self
	}

	/// Overrides how long the loopback listener waits.
	pub fn callback_timeout(mut self, timeout: StdDuration) -> Self {
		self.callback_timeout = timeout;

		self
	}

	/// Overrides the per-request HTTP timeout.
	pub fn request_timeout(mut self, timeout: StdDuration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the concurrency ceiling and dispatch cadence.
	pub fn rate_limit(mut self, max_concurrent: usize, requests_per_minute: u32) -> Self {
		self.max_concurrent = max_concurrent;
		self.requests_per_minute = requests_per_minute;

		self
	}

	/// Overrides the default cached-read TTL.
	pub fn cache_ttl(mut self, ttl: StdDuration) -> Self {
		self.cache_ttl = ttl;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<Config, ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::MissingClientId);
		}
		if self.client_secret.expose().trim().is_empty() {
			return Err(ConfigError::MissingClientSecret);
		}

		let base_url = match self.base_url {
			Some(url) => url,
			None => parse("base_url", DEFAULT_BASE_URL)?,
		};
		let redirect_uri = match self.redirect_uri {
			Some(url) => url,
			None => parse("redirect_uri", DEFAULT_REDIRECT_URI)?,
		};
		let callback = CallbackTarget::from_redirect(&redirect_uri)?;
		let endpoints = Endpoints::derive(&base_url)?;
		let token_path = match self.token_path {
			Some(path) => path,
			None => default_token_path()?,
		};

		Ok(Config {
			client_id: self.client_id,
			client_secret: self.client_secret,
			base_url,
			redirect_uri,
			callback,
			endpoints,
			token_path,
			refresh_buffer: self.refresh_buffer,
			callback_timeout: self.callback_timeout,
			request_timeout: self.request_timeout,
			max_concurrent: self.max_concurrent.max(1),
			requests_per_minute: self.requests_per_minute,
			cache_ttl: self.cache_ttl,
		})
	}
}

/// OAuth endpoints derived from the platform base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
	/// Browser-facing authorization endpoint.
	pub authorize: Url,
	/// Token endpoint for code exchange and refresh.
	pub token: Url,
}
impl Endpoints {
	/// Derives both endpoints from `base`.
	pub fn derive(base: &Url) -> Result<Self, ConfigError> {
		Ok(Self {
			authorize: join(base, "base_url", AUTHORIZE_PATH)?,
			token: join(base, "base_url", TOKEN_PATH)?,
		})
	}
}

/// Port and path the loopback listener serves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackTarget {
	/// Loopback address to bind: `::1` for an `[::1]` redirect, `127.0.0.1` otherwise.
	pub ip: IpAddr,
	/// Local port; `0` requests an ephemeral port.
	pub port: u16,
	/// Callback path, always starting with `/`.
	pub path: String,
}
impl CallbackTarget {
	/// Extracts the listener target from a loopback redirect URI.
	pub fn from_redirect(uri: &Url) -> Result<Self, ConfigError> {
		let invalid = |reason| ConfigError::InvalidRedirect { uri: uri.to_string(), reason };

		if uri.scheme() != "http" {
			return Err(invalid("only plain http is served on loopback"));
		}

		let ip = match uri.host_str() {
			Some("localhost" | "127.0.0.1") => IpAddr::V4(Ipv4Addr::LOCALHOST),
			Some("[::1]") => IpAddr::V6(Ipv6Addr::LOCALHOST),
			_ => return Err(invalid("host must be localhost or a loopback address")),
		};
		let port = uri.port_or_known_default().ok_or_else(|| invalid("port is missing"))?;

		Ok(Self { ip, port, path: uri.path().to_owned() })
	}
}

fn parse(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })
}

fn join(base: &Url, field: &'static str, path: &str) -> Result<Url, ConfigError> {
	let mut base = base.clone();

	if !base.path().ends_with('/') {
		let dir = format!("{}/", base.path());

		base.set_path(&dir);
	}

	base.join(path.trim_start_matches('/'))
		.map_err(|source| ConfigError::InvalidUrl { field, source })
}

fn default_token_path() -> Result<PathBuf, ConfigError> {
	dirs::config_dir()
		.map(|dir| dir.join(APP_DIR).join(TOKEN_FILE))
		.ok_or(ConfigError::NoConfigDir)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect::<HashMap<_, _>>();

		move |key| map.get(key).cloned()
	}

	#[test]
	fn missing_credentials_are_reported_first() {
		let err = Config::from_lookup(lookup(&[])).expect_err("Empty environment should fail.");

		assert!(matches!(err, ConfigError::MissingClientId));
		assert!(err.to_string().contains(ENV_CLIENT_ID));

		let err = Config::from_lookup(lookup(&[(ENV_CLIENT_ID, "id"), (ENV_CLIENT_SECRET, "  ")]))
			.expect_err("Blank secret should fail.");

		assert!(matches!(err, ConfigError::MissingClientSecret));
	}

	#[test]
	fn defaults_and_overrides_resolve() {
		let config = Config::from_lookup(lookup(&[
			(ENV_CLIENT_ID, "id"),
			(ENV_CLIENT_SECRET, "secret"),
			(ENV_BASE_URL, "https://eu1.anypoint.mulesoft.com"),
			(ENV_TOKEN_PATH, "/tmp/anypoint/tokens.json"),
		]))
		.expect("Environment with credentials should resolve.");

		assert_eq!(
			config.endpoints.token.as_str(),
			"https://eu1.anypoint.mulesoft.com/accounts/api/v2/oauth2/token"
		);
		assert_eq!(
			config.endpoints.authorize.as_str(),
			"https://eu1.anypoint.mulesoft.com/accounts/api/v2/oauth2/authorize"
		);
		assert_eq!(
			config.callback,
			CallbackTarget {
				ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
				port: 3000,
				path: "/api/callback".into()
			}
		);
		assert_eq!(config.token_path, PathBuf::from("/tmp/anypoint/tokens.json"));
		assert_eq!(config.refresh_buffer, Duration::minutes(5));
		assert_eq!(config.max_concurrent, 10);
		assert_eq!(config.requests_per_minute, 100);
	}

	#[test]
	fn base_url_with_path_prefix_keeps_prefix() {
		let config = Config::builder("id", "secret")
			.base_url("http://127.0.0.1:8080/proxy")
			.expect("Base URL should parse.")
			.token_path("/tmp/tokens.json")
			.build()
			.expect("Config should build.");

		assert_eq!(
			config.url("/accounts/api/me").expect("Path should join.").as_str(),
			"http://127.0.0.1:8080/proxy/accounts/api/me"
		);
	}

	#[test]
	fn non_loopback_redirect_is_rejected() {
		let err = Config::builder("id", "secret")
			.redirect_uri("https://example.com/callback")
			.expect("Redirect URI should parse.")
			.token_path("/tmp/tokens.json")
			.build()
			.expect_err("Remote redirect should be rejected.");

		assert!(matches!(err, ConfigError::InvalidRedirect { .. }));

		let err = Config::builder("id", "secret")
			.redirect_uri("not a url")
			.expect_err("Garbage redirect should fail to parse.");

		assert!(matches!(err, ConfigError::InvalidUrl { field: "redirect_uri", .. }));
	}

	#[test]
	fn ipv6_loopback_redirect_binds_ipv6() {
		let config = Config::builder("id", "secret")
			.redirect_uri("http://[::1]:4000/cb")
			.expect("Redirect URI should parse.")
			.token_path("/tmp/tokens.json")
			.build()
			.expect("IPv6 loopback redirect should be accepted.");

		assert_eq!(config.callback.ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
		assert_eq!(config.callback.port, 4000);
		assert_eq!(config.callback.path, "/cb");
	}
}
