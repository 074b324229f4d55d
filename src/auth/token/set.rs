//! Session token set persisted by the store and owned by the token manager.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Token type assumed when the provider omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";
/// Lifetime in seconds assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: i64 = 3_600;

/// Errors produced by [`TokenSetBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenSetBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the provider reported a negative lifetime.
	#[error("Token lifetime must not be negative, got {expires_in}s.")]
	NegativeLifetime {
		/// Offending lifetime in seconds.
		expires_in: i64,
	},
}

/// Authentication session record.
///
/// `expires_at` is an absolute epoch-millisecond timestamp computed once at issuance, so a
/// reloaded set stays correct across process restarts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Token type reported by the provider.
	#[serde(default = "default_token_type")]
	pub token_type: String,
	/// Lifetime in seconds as issued.
	pub expires_in: i64,
	/// Absolute expiry in epoch milliseconds.
	pub expires_at: i64,
	/// Granted scopes, space separated.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
}
impl TokenSet {
	/// Returns a builder for constructing token sets.
	pub fn builder() -> TokenSetBuilder {
		TokenSetBuilder::default()
	}

	/// Expiry as an [`OffsetDateTime`].
	pub fn expires_at_datetime(&self) -> OffsetDateTime {
		OffsetDateTime::from_unix_timestamp_nanos(self.expires_at as i128 * 1_000_000)
			.unwrap_or(OffsetDateTime::UNIX_EPOCH)
	}

	/// Returns `true` once `instant` has reached the absolute expiry.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		epoch_millis(instant) >= self.expires_at
	}

	/// Convenience helper that checks expiry against the current UTC instant.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` when the expiry falls inside `buffer` of `instant`.
	pub fn needs_refresh_at(&self, instant: OffsetDateTime, buffer: Duration) -> bool {
		self.expires_at < epoch_millis(instant + buffer)
	}

	/// Returns `true` when a refresh token is available.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|t| !t.is_empty())
	}

	/// Keeps `previous` as the refresh token when this set arrived without one.
	pub fn inherit_refresh_token(mut self, previous: Option<&TokenSecret>) -> Self {
		if self.refresh_token.is_none() {
			self.refresh_token = previous.cloned();
		}

		self
	}
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Builder for [`TokenSet`].
#[derive(Clone, Debug, Default)]
pub struct TokenSetBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	expires_in: Option<i64>,
	issued_at: Option<OffsetDateTime>,
	scope: Option<String>,
}
impl TokenSetBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Overrides the token type.
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the lifetime in seconds.
	pub fn expires_in(mut self, seconds: i64) -> Self {
		self.expires_in = Some(seconds);

		self
	}

	/// Sets the issuance instant the expiry is computed from.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets the granted scope string.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Consumes the builder and produces a [`TokenSet`].
	pub fn build(self) -> Result<TokenSet, TokenSetBuilderError> {
		let access_token = self.access_token.ok_or(TokenSetBuilderError::MissingAccessToken)?;
		let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);

		if expires_in < 0 {
			return Err(TokenSetBuilderError::NegativeLifetime { expires_in });
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = epoch_millis(issued_at).saturating_add(expires_in.saturating_mul(1_000));

		Ok(TokenSet {
			access_token,
			refresh_token: self.refresh_token,
			token_type: self.token_type.unwrap_or_else(default_token_type),
			expires_in,
			expires_at,
			scope: self.scope,
		})
	}
}

/// Converts an instant into epoch milliseconds.
pub fn epoch_millis(instant: OffsetDateTime) -> i64 {
	(instant.unix_timestamp_nanos() / 1_000_000) as i64
}

fn default_token_type() -> String {
	DEFAULT_TOKEN_TYPE.into()
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	fn fixture(expires_in: i64) -> TokenSet {
		TokenSet::builder()
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(datetime!(2025-01-01 00:00 UTC))
			.expires_in(expires_in)
			.build()
			.expect("Token set fixture should build.")
	}

	#[test]
	fn expires_at_is_issuance_plus_lifetime() {
		let set = fixture(3_600);

		assert_eq!(set.expires_at, epoch_millis(datetime!(2025-01-01 01:00 UTC)));
		assert_eq!(set.expires_at_datetime(), datetime!(2025-01-01 01:00 UTC));
		assert_eq!(set.token_type, "Bearer");
	}

	#[test]
	fn refresh_buffer_is_applied_before_expiry() {
		let set = fixture(3_600);
		let buffer = Duration::minutes(5);

		assert!(!set.needs_refresh_at(datetime!(2025-01-01 00:54 UTC), buffer));
		assert!(set.needs_refresh_at(datetime!(2025-01-01 00:56 UTC), buffer));
		assert!(!set.is_expired_at(datetime!(2025-01-01 00:59 UTC)));
		assert!(set.is_expired_at(datetime!(2025-01-01 01:00 UTC)));
	}

	#[test]
	fn builder_rejects_missing_access_token_and_negative_lifetime() {
		assert_eq!(
			TokenSet::builder().expires_in(10).build(),
			Err(TokenSetBuilderError::MissingAccessToken)
		);
		assert_eq!(
			TokenSet::builder().access_token("a").expires_in(-1).build(),
			Err(TokenSetBuilderError::NegativeLifetime { expires_in: -1 })
		);
	}

	#[test]
	fn serialized_form_uses_camel_case_and_keeps_debug_redacted() {
		let set = fixture(60);
		let json = serde_json::to_value(&set).expect("Token set should serialize to JSON.");

		assert_eq!(json["accessToken"], "access");
		assert_eq!(json["refreshToken"], "refresh");
		assert_eq!(json["tokenType"], "Bearer");
		assert_eq!(json["expiresIn"], 60);
		assert!(json["expiresAt"].is_i64());

		let debug = format!("{set:?}");

		assert!(!debug.contains("access\""));
		assert!(debug.contains("<redacted>"));
	}

	#[test]
	fn missing_refresh_token_is_inherited() {
		let previous = TokenSecret::new("old-refresh");
		let set = TokenSet::builder()
			.access_token("fresh")
			.build()
			.expect("Token set should build.")
			.inherit_refresh_token(Some(&previous));

		assert_eq!(set.refresh_token.as_ref().map(TokenSecret::expose), Some("old-refresh"));
		assert!(set.can_refresh());
		assert!(!fixture(1).inherit_refresh_token(None).refresh_token.is_none());
	}
}
