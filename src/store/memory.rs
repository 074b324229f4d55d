//! Thread-safe in-memory [`TokenStore`] for tests and embedding.

// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	store::{StoreFuture, TokenStore},
};

/// Storage backend that keeps the token set in-process.
///
/// Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Option<TokenSet>>>);
impl MemoryStore {
	/// Creates a store that already holds `tokens`.
	pub fn with_tokens(tokens: TokenSet) -> Self {
		Self(Arc::new(RwLock::new(Some(tokens))))
	}

	/// Returns the stored set without going through the async contract.
	pub fn snapshot(&self) -> Option<TokenSet> {
		self.0.read().clone()
	}
}
impl TokenStore for MemoryStore {
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			*slot.write() = Some(tokens);

			Ok(())
		})
	}

	fn load(&self) -> StoreFuture<'_, Option<TokenSet>> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(slot.read().clone()) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			slot.write().take();

			Ok(())
		})
	}

	fn exists(&self) -> StoreFuture<'_, bool> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(slot.read().is_some()) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn save_load_clear_cycle() {
		let store = MemoryStore::default();
		let tokens = TokenSet::builder()
			.access_token("access")
			.expires_in(60)
			.build()
			.expect("Token set fixture should build.");

		assert!(!store.exists().await.expect("Exists should succeed."));

		store.save(tokens.clone()).await.expect("Save should succeed.");

		assert_eq!(store.load().await.expect("Load should succeed."), Some(tokens));
		assert!(store.exists().await.expect("Exists should succeed."));

		store.clear().await.expect("Clear should succeed.");
		store.clear().await.expect("Clearing twice should succeed.");

		assert_eq!(store.snapshot(), None);
	}
}
