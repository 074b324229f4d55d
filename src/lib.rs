//! Session broker for the Anypoint Platform: loopback OAuth login, encrypted-at-rest tokens,
//! transparent refresh, and a rate-limited, cached request pipeline for every platform call.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod pipeline;
pub mod rate_limit;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixture builders for tests; enabled via `cfg(test)` or the
	//! `test` feature (`cargo test --features test` runs the integration suite).

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{MachineIdentity, TokenSet},
		config::Config,
		session::TokenManager,
		store::{MemoryStore, TokenStore},
	};

	/// Client identifier used by test fixtures.
	pub const TEST_CLIENT_ID: &str = "client-it";
	/// Client secret used by test fixtures.
	pub const TEST_CLIENT_SECRET: &str = "secret-it";

	/// Fixed identity so encrypted stores derive the same key across test runs.
	pub fn test_identity() -> MachineIdentity {
		MachineIdentity::new("test-host", "test-user")
	}

	/// Builds a configuration pointed at `base_url` (usually an `httpmock` server).
	pub fn test_config(base_url: &str) -> Config {
		Config::builder(TEST_CLIENT_ID, TEST_CLIENT_SECRET)
			.base_url(base_url)
			.expect("Mock base URL should parse.")
			.redirect_uri("http://127.0.0.1:0/api/callback")
			.expect("Test redirect URI should parse.")
			.token_path(std::env::temp_dir().join("anypoint-broker-unused.json"))
			.build()
			.expect("Test configuration should build.")
	}

	/// Constructs a [`TokenManager`] backed by an in-memory store.
	pub fn build_test_manager(config: &Config) -> (Arc<TokenManager>, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn TokenStore> = store_backend.clone();
		let manager = TokenManager::with_store(config, store)
			.expect("Token manager should build from test configuration.");

		(Arc::new(manager), store_backend)
	}

	/// Builds a token set that expires `lifetime` from now.
	pub fn token_set_expiring_in(access: &str, refresh: Option<&str>, lifetime: Duration) -> TokenSet {
		let mut builder = TokenSet::builder()
			.access_token(access)
			.issued_at(OffsetDateTime::now_utc())
			.expires_in(lifetime.whole_seconds());

		if let Some(refresh) = refresh {
			builder = builder.refresh_token(refresh);
		}

		builder.build().expect("Token set fixture should build.")
	}
}

mod _prelude {
	pub use std::{
		collections::{HashMap, HashSet, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tracing_subscriber as _};
