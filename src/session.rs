//! Session state machine: reuse, refresh, or demand a new login.
//!
//! [`TokenManager`] owns the in-memory session and treats the [`TokenStore`] as a passive
//! backing copy. A session moves between four conceptual states:
//!
//! - unauthenticated: nothing stored; callers get [`Error::Unauthenticated`] without any
//!   network activity;
//! - valid: the access token outlives the refresh buffer and is returned as is;
//! - needs refresh: the token expires inside the buffer and a refresh token is available;
//! - expired without refresh: callers get [`Error::SessionExpired`].
//!
//! Refreshes are single-flight. One async guard per manager serializes the decision, and a
//! caller that waited on the guard re-reads the session before refreshing again.

mod metrics;

pub use metrics::SessionMetrics;

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, TokenSet},
	config::{CallbackTarget, Config},
	oauth::{CallbackListener, OAuthClient},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{EncryptedFileStore, TokenStore},
};

const STATE_LEN: usize = 32;

/// Read-only snapshot of the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
	/// `true` when the session is usable now or can be renewed without a login.
	pub authenticated: bool,
	/// Absolute expiry in epoch milliseconds, if a session exists.
	pub expires_at: Option<i64>,
	/// `true` once the access token is past its expiry.
	pub is_expired: bool,
	/// `true` when a refresh token is stored.
	pub can_refresh: bool,
}
impl SessionStatus {
	fn unauthenticated() -> Self {
		Self { authenticated: false, expires_at: None, is_expired: false, can_refresh: false }
	}

	fn of(tokens: &TokenSet, now: OffsetDateTime) -> Self {
		let is_expired = tokens.is_expired_at(now);
		let can_refresh = tokens.can_refresh();

		Self {
			authenticated: !is_expired || can_refresh,
			expires_at: Some(tokens.expires_at),
			is_expired,
			can_refresh,
		}
	}
}

/// Owns the session and orchestrates the OAuth client and the token store.
pub struct TokenManager {
	oauth: OAuthClient,
	store: Arc<dyn TokenStore>,
	session: RwLock<Option<TokenSet>>,
	refresh_guard: AsyncMutex<()>,
	refresh_buffer: Duration,
	callback: CallbackTarget,
	redirect_uri: Url,
	callback_timeout: StdDuration,
	metrics: Arc<SessionMetrics>,
}
impl TokenManager {
	/// Builds a manager backed by the encrypted file store at `config.token_path`.
	pub fn new(config: &Config) -> Result<Self> {
		let store: Arc<dyn TokenStore> = Arc::new(EncryptedFileStore::open(&config.token_path));

		Self::with_store(config, store)
	}

	/// Builds a manager backed by a caller-provided store.
	pub fn with_store(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
		Ok(Self::with_parts(config, OAuthClient::new(config)?, store))
	}

	/// Builds a manager from pre-built collaborators.
	pub fn with_parts(config: &Config, oauth: OAuthClient, store: Arc<dyn TokenStore>) -> Self {
		Self {
			oauth,
			store,
			session: RwLock::new(None),
			refresh_guard: AsyncMutex::new(()),
			refresh_buffer: config.refresh_buffer,
			callback: config.callback.clone(),
			redirect_uri: config.redirect_uri.clone(),
			callback_timeout: config.callback_timeout,
			metrics: Default::default(),
		}
	}

	/// Session counters.
	pub fn metrics(&self) -> Arc<SessionMetrics> {
		self.metrics.clone()
	}

	/// Returns a valid access token, refreshing it when it expires inside the buffer.
	pub async fn access_token(&self) -> Result<TokenSecret> {
		self.access_token_at(OffsetDateTime::now_utc()).await
	}

	/// [`TokenManager::access_token`] evaluated at `now`.
	pub async fn access_token_at(&self, now: OffsetDateTime) -> Result<TokenSecret> {
		let tokens = self.current().await?.ok_or(Error::Unauthenticated)?;

		if !tokens.needs_refresh_at(now, self.refresh_buffer) {
			return Ok(tokens.access_token);
		}

		let _singleflight = self.refresh_guard.lock().await;
		// Another caller may have refreshed while this one waited.
		let tokens = self.current().await?.ok_or(Error::Unauthenticated)?;

		if !tokens.needs_refresh_at(now, self.refresh_buffer) {
			return Ok(tokens.access_token);
		}
		if !tokens.can_refresh() {
			return Err(Error::SessionExpired);
		}

		let refreshed = self.refresh_locked(tokens).await?;

		Ok(refreshed.access_token)
	}

	/// Runs the interactive login, opening the authorize URL in the default browser.
	pub async fn authenticate(&self) -> Result<TokenSet> {
		self.authenticate_with(|url| open::that(url.as_str())).await
	}

	/// Runs the interactive login, handing the authorize URL to `launcher`.
	///
	/// The callback listener is bound before `launcher` runs so a fast browser can never hit a
	/// closed port. A failing launcher is logged, not fatal: the URL is logged for manual use.
	pub async fn authenticate_with<F>(&self, launcher: F) -> Result<TokenSet>
	where
		F: FnOnce(&Url) -> std::io::Result<()>,
	{
		const KIND: FlowKind = FlowKind::Authorization;

		let span = FlowSpan::new(KIND, "session.authenticate");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let listener = CallbackListener::bind_on(
					self.callback.ip,
					self.callback.port,
					&self.callback.path,
				)
				.await?;
				let redirect_uri = listener.redirect_uri(&self.redirect_uri);
				let state = random_state();
				let url = self.oauth.authorize_url_for(&state, &redirect_uri);

				tracing::info!(%url, "open this URL in a browser to sign in");

				if let Err(e) = launcher(&url) {
					tracing::warn!(error = %e, "unable to launch a browser; open the URL manually");
				}

				let callback = listener.wait(self.callback_timeout).await?;

				if callback.state != state {
					return Err(Error::StateMismatch);
				}

				let tokens = self.oauth.exchange_code_for(&callback.code, &redirect_uri).await?;

				self.persist(tokens.clone()).await?;
				self.metrics.record_login();

				Ok(tokens)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Forces a refresh regardless of the remaining lifetime.
	pub async fn refresh(&self) -> Result<TokenSet> {
		let _singleflight = self.refresh_guard.lock().await;
		let tokens = self.current().await?.ok_or(Error::Unauthenticated)?;

		if !tokens.can_refresh() {
			return Err(Error::MissingRefreshToken);
		}

		self.refresh_locked(tokens).await
	}

	/// Clears the stored and the in-memory session.
	pub async fn logout(&self) -> Result<()> {
		let _singleflight = self.refresh_guard.lock().await;

		self.store.clear().await?;
		self.session.write().take();

		tracing::info!("session cleared");

		Ok(())
	}

	/// Read-only session snapshot.
	pub async fn status(&self) -> Result<SessionStatus> {
		self.status_at(OffsetDateTime::now_utc()).await
	}

	/// [`TokenManager::status`] evaluated at `now`. Never touches the network or the session.
	pub async fn status_at(&self, now: OffsetDateTime) -> Result<SessionStatus> {
		let cached = self.session.read().clone();
		let tokens = match cached {
			Some(tokens) => Some(tokens),
			None => self.store.load().await?,
		};

		Ok(tokens.map_or_else(SessionStatus::unauthenticated, |t| SessionStatus::of(&t, now)))
	}

	async fn current(&self) -> Result<Option<TokenSet>> {
		let cached = self.session.read().clone();

		if cached.is_some() {
			return Ok(cached);
		}

		let loaded = self.store.load().await?;

		if let Some(tokens) = &loaded {
			*self.session.write() = Some(tokens.clone());
		}

		Ok(loaded)
	}

	async fn refresh_locked(&self, current: TokenSet) -> Result<TokenSet> {
		let refresh_token = current.refresh_token.clone().ok_or(Error::MissingRefreshToken)?;

		self.metrics.record_refresh_attempt();

		let result = async {
			let refreshed = self
				.oauth
				.refresh_token(refresh_token.expose())
				.await?
				.inherit_refresh_token(Some(&refresh_token));

			self.persist(refreshed.clone()).await?;

			Ok(refreshed)
		}
		.await;

		match &result {
			Ok(tokens) => {
				self.metrics.record_refresh_success();

				tracing::debug!(expires_at = tokens.expires_at, "access token refreshed");
			},
			Err(e) => {
				self.metrics.record_refresh_failure();

				tracing::warn!(error = %e, "access token refresh failed");
			},
		}

		result
	}

	async fn persist(&self, tokens: TokenSet) -> Result<()> {
		self.store.save(tokens.clone()).await?;
		*self.session.write() = Some(tokens);

		Ok(())
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("session", &*self.session.read())
			.field("refresh_buffer", &self.refresh_buffer)
			.field("callback", &self.callback)
			.finish_non_exhaustive()
	}
}

fn random_state() -> String {
	rand::rng().sample_iter(Alphanumeric).take(STATE_LEN).map(char::from).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn manager(store: MemoryStore) -> TokenManager {
		let config = Config::builder("client", "secret")
			.base_url("http://127.0.0.1:9")
			.expect("Base URL should parse.")
			.token_path("/tmp/unused.json")
			.build()
			.expect("Config should build.");

		TokenManager::with_store(&config, Arc::new(store)).expect("Manager should build.")
	}

	fn tokens(lifetime: i64, refresh: bool) -> TokenSet {
		let builder = TokenSet::builder().access_token("access").expires_in(lifetime);
		let builder = if refresh { builder.refresh_token("refresh") } else { builder };

		builder.build().expect("Token set fixture should build.")
	}

	#[test]
	fn random_state_is_alphanumeric() {
		let state = random_state();

		assert_eq!(state.len(), STATE_LEN);
		assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(state, random_state());
	}

	#[tokio::test]
	async fn empty_store_is_unauthenticated() {
		let manager = manager(MemoryStore::default());
		let err = manager.access_token().await.expect_err("Empty store should fail.");

		assert!(matches!(err, Error::Unauthenticated));
		assert_eq!(
			manager.status().await.expect("Status should load."),
			SessionStatus::unauthenticated()
		);
	}

	#[tokio::test]
	async fn valid_token_is_returned_and_cached() {
		let store = MemoryStore::with_tokens(tokens(3_600, true));
		let manager = manager(store.clone());
		let token = manager.access_token().await.expect("Valid token should be returned.");

		assert_eq!(token.expose(), "access");

		store.clear().await.expect("Clearing the backing store should succeed.");

		let token = manager.access_token().await.expect("Cached session should be reused.");

		assert_eq!(token.expose(), "access");
		assert_eq!(manager.metrics().refresh_attempts(), 0);
	}

	#[tokio::test]
	async fn expiring_token_without_refresh_is_session_expired() {
		let manager = manager(MemoryStore::with_tokens(tokens(60, false)));
		let err = manager.access_token().await.expect_err("Expiring token should fail.");

		assert!(matches!(err, Error::SessionExpired));

		let status = manager.status().await.expect("Status should load.");

		assert!(status.authenticated);
		assert!(!status.can_refresh);

		let later = OffsetDateTime::now_utc() + Duration::minutes(2);
		let status = manager.status_at(later).await.expect("Status should load.");

		assert!(status.is_expired);
		assert!(!status.authenticated);
	}

	#[tokio::test]
	async fn explicit_refresh_requires_refresh_token() {
		let without_refresh = manager(MemoryStore::with_tokens(tokens(3_600, false)));

		assert!(matches!(without_refresh.refresh().await, Err(Error::MissingRefreshToken)));

		let empty = manager(MemoryStore::default());

		assert!(matches!(empty.refresh().await, Err(Error::Unauthenticated)));
	}

	#[tokio::test]
	async fn logout_clears_store_and_session() {
		let store = MemoryStore::with_tokens(tokens(3_600, true));
		let manager = manager(store.clone());

		manager.access_token().await.expect("Valid token should be returned.");
		manager.logout().await.expect("Logout should succeed.");

		assert_eq!(store.snapshot(), None);
		assert!(matches!(manager.access_token().await, Err(Error::Unauthenticated)));
	}
}
