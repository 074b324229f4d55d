//! Authorization-code client for the platform's OAuth endpoints.
//!
//! The flow is tailored to one provider: the authorize URL always requests
//! `full offline_access`, and both grants authenticate with the client secret in the form body.

pub mod callback;

pub use callback::{AuthorizationCallback, CallbackListener, wait_for_callback};

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, TokenSet},
	config::{Config, Endpoints, SCOPES},
	error::{ConfigError, TransportError},
	http,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const TOKEN_TARGET: &str = "token endpoint";

/// Client for the authorize and token endpoints.
#[derive(Clone, Debug)]
pub struct OAuthClient {
	http: ReqwestClient,
	client_id: String,
	client_secret: TokenSecret,
	endpoints: Endpoints,
	redirect_uri: Url,
}
impl OAuthClient {
	/// Builds a client with its own HTTP transport.
	pub fn new(config: &Config) -> Result<Self> {
		Ok(Self::with_http_client(config, config.http_client()?))
	}

	/// Builds a client around an existing HTTP transport.
	pub fn with_http_client(config: &Config, http: ReqwestClient) -> Self {
		Self {
			http,
			client_id: config.client_id.clone(),
			client_secret: config.client_secret.clone(),
			endpoints: config.endpoints.clone(),
			redirect_uri: config.redirect_uri.clone(),
		}
	}

	/// Configured redirect URI.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Authorize URL for the configured redirect URI.
	pub fn authorize_url(&self, state: &str) -> Url {
		self.authorize_url_for(state, &self.redirect_uri)
	}

	/// Authorize URL for an explicit redirect URI, e.g. one carrying an ephemeral port.
	pub fn authorize_url_for(&self, state: &str, redirect_uri: &Url) -> Url {
		let mut url = self.endpoints.authorize.clone();

		url.query_pairs_mut()
			.append_pair("client_id", &self.client_id)
			.append_pair("redirect_uri", redirect_uri.as_str())
			.append_pair("response_type", "code")
			.append_pair("scope", SCOPES)
			.append_pair("state", state);

		url
	}

	/// Exchanges an authorization code using the configured redirect URI.
	pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
		self.exchange_code_for(code, &self.redirect_uri).await
	}

	/// Exchanges an authorization code; `redirect_uri` must match the one sent to the browser.
	pub async fn exchange_code_for(&self, code: &str, redirect_uri: &Url) -> Result<TokenSet> {
		let form = [
			("grant_type", "authorization_code"),
			("code", code),
			("redirect_uri", redirect_uri.as_str()),
			("client_id", self.client_id.as_str()),
			("client_secret", self.client_secret.expose()),
		];

		self.request_token(FlowKind::CodeExchange, &form).await
	}

	/// Redeems a refresh token.
	///
	/// The returned set carries no refresh token when the provider did not rotate it; callers
	/// keep the previous one via [`TokenSet::inherit_refresh_token`].
	pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
		let form = [
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("client_id", self.client_id.as_str()),
			("client_secret", self.client_secret.expose()),
		];

		self.request_token(FlowKind::Refresh, &form).await
	}

	async fn request_token(&self, kind: FlowKind, form: &[(&str, &str)]) -> Result<TokenSet> {
		let span = FlowSpan::new(kind, "oauth.request_token");

		obs::record_flow_outcome(kind, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let response = self
					.http
					.post(self.endpoints.token.clone())
					.form(form)
					.send()
					.await
					.map_err(|e| TransportError::network(TOKEN_TARGET, e))?;
				let (meta, body) = http::read_text(response, TOKEN_TARGET).await?;

				if !meta.is_success() {
					tracing::warn!(status = meta.status, "token endpoint rejected the request");

					return Err(Error::TokenEndpoint { status: meta.status, body });
				}

				parse_token_response(meta.status, &body, OffsetDateTime::now_utc())
			})
			.await;

		obs::record_result(kind, &result);

		result
	}
}

/// Token endpoint success payload.
#[derive(Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	scope: Option<String>,
}
impl TokenResponse {
	fn into_token_set(self, issued_at: OffsetDateTime) -> Result<TokenSet> {
		let mut builder =
			TokenSet::builder().access_token(self.access_token).issued_at(issued_at);

		if let Some(refresh) = self.refresh_token.filter(|r| !r.is_empty()) {
			builder = builder.refresh_token(refresh);
		}
		if let Some(token_type) = self.token_type {
			builder = builder.token_type(token_type);
		}
		if let Some(expires_in) = self.expires_in {
			builder = builder.expires_in(expires_in);
		}
		if let Some(scope) = self.scope {
			builder = builder.scope(scope);
		}

		builder.build().map_err(|e| ConfigError::from(e).into())
	}
}

fn parse_token_response(status: u16, body: &str, issued_at: OffsetDateTime) -> Result<TokenSet> {
	let mut deserializer = serde_json::Deserializer::from_str(body);
	let response: TokenResponse = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| TransportError::TokenResponseParse { source, status })?;

	response.into_token_set(issued_at)
}
