//! Storage contract for the session token set and its built-in implementations.

pub mod encrypted;
pub mod memory;

pub use encrypted::EncryptedFileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::TokenSet};

/// Boxed future returned by every [`TokenStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for the single session token set.
///
/// The store is a passive collaborator: the token manager decides when to save, load, or clear.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists `tokens`, fully replacing whatever was stored before.
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()>;

	/// Loads the stored token set, or `None` when nothing usable is stored.
	fn load(&self) -> StoreFuture<'_, Option<TokenSet>>;

	/// Removes the stored token set. Clearing an empty store succeeds.
	fn clear(&self) -> StoreFuture<'_, ()>;

	/// Reports whether anything is stored, without decoding it.
	fn exists(&self) -> StoreFuture<'_, bool>;
}

/// On-disk envelope for an encrypted token set. Every field is lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRecord {
	/// Per-write random nonce.
	pub iv: String,
	/// AEAD authentication tag.
	pub auth_tag: String,
	/// Ciphertext of the serialized token set.
	pub data: String,
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage medium.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Sealing the token set failed.
	#[error("Encryption failure: {message}.")]
	Encryption {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_broker_error_with_source() {
		let store_error = StoreError::Backend { message: "disk unreachable".into() };
		let broker_error: Error = store_error.clone().into();

		assert!(matches!(broker_error, Error::Storage(_)));
		assert!(broker_error.to_string().contains("disk unreachable"));

		let source = StdError::source(&broker_error)
			.expect("Broker error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn encrypted_record_uses_camel_case_fields() {
		let record =
			EncryptedRecord { iv: "00".into(), auth_tag: "11".into(), data: "22".into() };
		let json = serde_json::to_value(&record).expect("Record should serialize to JSON.");

		assert_eq!(json, serde_json::json!({ "iv": "00", "authTag": "11", "data": "22" }));
	}
}
