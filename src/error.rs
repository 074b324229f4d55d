//! Broker-level error types shared by the session, store, OAuth, and pipeline layers.

// self
use crate::_prelude::*;

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, malformed payloads).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Loopback callback listener failure.
	#[error(transparent)]
	Callback(#[from] CallbackError),

	/// No session is stored.
	#[error("Not authenticated. Run the login command to sign in.")]
	Unauthenticated,
	/// The stored session is inside the refresh buffer and carries no refresh token.
	#[error("Session expired and no refresh token is available. Run the login command again.")]
	SessionExpired,
	/// An explicit refresh was requested but the session carries no refresh token.
	#[error("No refresh token is stored for the current session. Run the login command again.")]
	MissingRefreshToken,
	/// The provider redirected back with an OAuth error.
	#[error("Authorization failed: {error}{}", parenthesize(.description))]
	OAuthProvider {
		/// Provider `error` parameter.
		error: String,
		/// Provider `error_description` parameter, if present.
		description: Option<String>,
	},
	/// The token endpoint answered with a non-success status.
	#[error("Token endpoint returned HTTP {status}: {body}")]
	TokenEndpoint {
		/// HTTP status code.
		status: u16,
		/// Raw response body.
		body: String,
	},
	/// The `state` echoed by the provider does not match the one that was sent.
	#[error("Authorization state mismatch.")]
	StateMismatch,
	/// A platform API call answered with a non-success status.
	#[error("Request failed with HTTP {status}: {body}")]
	Api {
		/// HTTP status code.
		status: u16,
		/// Raw response body.
		body: String,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The rate limiter stopped admitting work.
	#[error("Rate limiter is closed.")]
	LimiterClosed,
}

/// Configuration and validation failures raised before any network activity.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// No client identifier was configured.
	#[error(
		"Missing client id. Set ANYPOINT_CLIENT_ID to the id of a connected app that uses the authorization-code grant."
	)]
	MissingClientId,
	/// No client secret was configured.
	#[error("Missing client secret. Set ANYPOINT_CLIENT_SECRET to the secret of the connected app.")]
	MissingClientSecret,
	/// A configured URL cannot be parsed.
	#[error("Configured {field} is not a valid URL.")]
	InvalidUrl {
		/// Name of the offending setting.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The redirect URI cannot be served by the loopback listener.
	#[error("Redirect URI `{uri}` cannot be served locally: {reason}.")]
	InvalidRedirect {
		/// Offending redirect URI.
		uri: String,
		/// Why the URI was rejected.
		reason: &'static str,
	},
	/// No per-user configuration directory could be located.
	#[error("Unable to locate a per-user configuration directory for the token file.")]
	NoConfigDir,
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Token set builder validation failed.
	#[error("Unable to build token set.")]
	TokenBuild(#[from] crate::auth::TokenSetBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}

/// Transport-level failures (network, IO, undecodable payloads).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Endpoint label used in the message.
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
	/// Token endpoint answered 2xx with JSON that does not match the token response shape.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code.
		status: u16,
	},
	/// A platform API answered 2xx with a body that is not valid JSON.
	#[error("Platform API returned malformed JSON.")]
	ResponseParse(#[source] serde_json::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error for the given endpoint label.
	pub fn network(target: &'static str, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { target, source: Box::new(src) }
	}
}

/// Failures raised by the loopback callback listener.
#[derive(Debug, ThisError)]
pub enum CallbackError {
	/// The listener could not bind the requested port.
	#[error("Unable to listen for the OAuth callback on port {port}.")]
	Bind {
		/// Requested port.
		port: u16,
		/// Underlying socket failure.
		#[source]
		source: std::io::Error,
	},
	/// The browser flow was not completed in time.
	#[error("Timed out after {}s waiting for the OAuth callback.", .waited.as_secs_f32())]
	Timeout {
		/// How long the listener waited.
		waited: StdDuration,
	},
	/// The listener stopped before any callback arrived.
	#[error("OAuth callback listener stopped unexpectedly.")]
	Closed,
	/// The HTTP server failed while serving the callback.
	#[error("OAuth callback server failed.")]
	Server(#[source] std::io::Error),
}

fn parenthesize(description: &Option<String>) -> String {
	description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default()
}
