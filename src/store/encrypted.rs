//! Encrypted-at-rest [`TokenStore`] backed by a single JSON file.
//!
//! The token set is sealed with ChaCha20-Poly1305 under a key derived by PBKDF2-HMAC-SHA256
//! from the [`MachineIdentity`], so the file is only readable by the same user on the same
//! host. Anything that fails to parse, decode, or authenticate is treated as "no token": the
//! file is removed and a warning is logged.

// std
use std::{
	fs::{self, OpenOptions},
	io::{ErrorKind, Write},
};
// crates.io
use chacha20poly1305::{
	ChaCha20Poly1305, Key, Nonce, Tag,
	aead::{AeadInPlace, KeyInit},
};
use rand::RngCore;
use sha2::Sha256;
// self
use crate::{
	_prelude::*,
	auth::{MachineIdentity, TokenSet},
	store::{EncryptedRecord, StoreError, StoreFuture, TokenStore},
};

/// Application salt mixed into key derivation.
pub const KEY_SALT: &[u8] = b"anypoint-broker/token-store/v1";
/// PBKDF2 iteration count.
pub const KEY_ROUNDS: u32 = 100_000;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// File-backed store that seals the token set before it touches disk.
pub struct EncryptedFileStore {
	path: PathBuf,
	cipher: ChaCha20Poly1305,
}
impl EncryptedFileStore {
	/// Opens a store at `path`, keyed by the discovered machine identity.
	pub fn open(path: impl Into<PathBuf>) -> Self {
		Self::with_identity(path, &MachineIdentity::discover())
	}

	/// Opens a store at `path`, keyed by an explicit identity.
	///
	/// Key derivation runs once here; later calls reuse the cipher.
	pub fn with_identity(path: impl Into<PathBuf>, identity: &MachineIdentity) -> Self {
		let mut key = [0_u8; KEY_LEN];

		pbkdf2::pbkdf2_hmac::<Sha256>(
			identity.key_material().as_bytes(),
			KEY_SALT,
			KEY_ROUNDS,
			&mut key,
		);

		let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

		Self { path: path.into(), cipher }
	}

	/// Location of the token file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn seal(&self, tokens: &TokenSet) -> Result<EncryptedRecord, StoreError> {
		let mut buffer = serde_json::to_vec(tokens).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize token set: {e}"),
		})?;
		let mut iv = [0_u8; NONCE_LEN];

		rand::rng().fill_bytes(&mut iv);

		let tag = self
			.cipher
			.encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
			.map_err(|e| StoreError::Encryption { message: e.to_string() })?;

		Ok(EncryptedRecord {
			iv: hex::encode(iv),
			auth_tag: hex::encode(tag),
			data: hex::encode(buffer),
		})
	}

	fn unseal(&self, raw: &[u8]) -> Result<TokenSet, String> {
		let record: EncryptedRecord =
			serde_json::from_slice(raw).map_err(|e| format!("envelope is not valid JSON: {e}"))?;
		let iv = hex::decode(&record.iv).map_err(|e| format!("iv is not hex: {e}"))?;
		let tag = hex::decode(&record.auth_tag).map_err(|e| format!("authTag is not hex: {e}"))?;
		let mut buffer = hex::decode(&record.data).map_err(|e| format!("data is not hex: {e}"))?;

		if iv.len() != NONCE_LEN {
			return Err(format!("iv has {} bytes, expected {NONCE_LEN}", iv.len()));
		}
		if tag.len() != TAG_LEN {
			return Err(format!("authTag has {} bytes, expected {TAG_LEN}", tag.len()));
		}

		self.cipher
			.decrypt_in_place_detached(
				Nonce::from_slice(&iv),
				b"",
				&mut buffer,
				Tag::from_slice(&tag),
			)
			.map_err(|_| "authentication tag did not verify".to_owned())?;

		serde_json::from_slice(&buffer).map_err(|e| format!("payload is not a token set: {e}"))
	}

	fn save_now(&self, tokens: &TokenSet) -> Result<(), StoreError> {
		let record = self.seal(tokens)?;
		let payload = serde_json::to_vec_pretty(&record).map_err(|e| {
			StoreError::Serialization { message: format!("Failed to serialize envelope: {e}") }
		})?;

		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create token directory {}: {e}", parent.display()),
			})?;
		}

		let tmp_path = self.path.with_extension("json.tmp");

		{
			let mut file = private_file(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&payload).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn load_now(&self) -> Result<Option<TokenSet>, StoreError> {
		let raw = match fs::read(&self.path) {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", self.path.display()),
				}),
		};

		match self.unseal(&raw) {
			Ok(tokens) => Ok(Some(tokens)),
			Err(reason) => {
				tracing::warn!(
					path = %self.path.display(),
					%reason,
					"discarding unreadable token file"
				);

				self.clear_now()?;

				Ok(None)
			},
		}
	}

	fn clear_now(&self) -> Result<(), StoreError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to remove {}: {e}", self.path.display()),
			}),
		}
	}
}
impl Debug for EncryptedFileStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EncryptedFileStore")
			.field("path", &self.path)
			.field("cipher", &"<redacted>")
			.finish()
	}
}
impl TokenStore for EncryptedFileStore {
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.save_now(&tokens) })
	}

	fn load(&self) -> StoreFuture<'_, Option<TokenSet>> {
		Box::pin(async move { self.load_now() })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.clear_now() })
	}

	fn exists(&self) -> StoreFuture<'_, bool> {
		Box::pin(async move {
			self.path.try_exists().map_err(|e| StoreError::Backend {
				message: format!("Failed to inspect {}: {e}", self.path.display()),
			})
		})
	}
}

#[cfg(unix)]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
	// std
	use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

	let file = OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;

	// A leftover temp file keeps its old mode, so tighten it explicitly.
	file.set_permissions(fs::Permissions::from_mode(0o600))?;

	Ok(file)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
	OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn store_in(dir: &Path) -> EncryptedFileStore {
		EncryptedFileStore::with_identity(dir.join("tokens.json"), &MachineIdentity::new("h", "u"))
	}

	fn scratch_dir(name: &str) -> PathBuf {
		let dir = std::env::temp_dir()
			.join(format!("anypoint-broker-unit-{name}-{}", std::process::id()));

		let _ = fs::remove_dir_all(&dir);

		dir
	}

	#[test]
	fn sealed_envelope_round_trips_and_hides_plaintext() {
		let dir = scratch_dir("seal");
		let store = store_in(&dir);
		let tokens = TokenSet::builder()
			.access_token("plain-access-token")
			.refresh_token("plain-refresh-token")
			.expires_in(3_600)
			.build()
			.expect("Token set fixture should build.");
		let record = store.seal(&tokens).expect("Sealing should succeed.");

		assert_eq!(record.iv.len(), NONCE_LEN * 2);
		assert_eq!(record.auth_tag.len(), TAG_LEN * 2);
		assert!(!record.data.contains(&hex::encode("plain-access-token")));

		let second = store.seal(&tokens).expect("Sealing should succeed.");

		assert_ne!(record.iv, second.iv);

		let raw = serde_json::to_vec(&record).expect("Envelope should serialize.");

		assert_eq!(store.unseal(&raw), Ok(tokens));
	}

	#[test]
	fn tampered_ciphertext_fails_authentication() {
		let dir = scratch_dir("tamper");
		let store = store_in(&dir);
		let tokens = TokenSet::builder()
			.access_token("access")
			.build()
			.expect("Token set fixture should build.");
		let mut record = store.seal(&tokens).expect("Sealing should succeed.");
		let flipped = if record.data.starts_with('0') { "1" } else { "0" };

		record.data.replace_range(0..1, flipped);

		let raw = serde_json::to_vec(&record).expect("Envelope should serialize.");
		let reason = store.unseal(&raw).expect_err("Tampered data should be rejected.");

		assert!(reason.contains("did not verify"));
	}

	#[test]
	fn wrong_identity_cannot_unseal() {
		let dir = scratch_dir("identity");
		let store = store_in(&dir);
		let other =
			EncryptedFileStore::with_identity(dir.join("tokens.json"), &MachineIdentity::new("h", "v"));
		let tokens = TokenSet::builder()
			.access_token("access")
			.build()
			.expect("Token set fixture should build.");
		let raw = serde_json::to_vec(&store.seal(&tokens).expect("Sealing should succeed."))
			.expect("Envelope should serialize.");

		assert!(other.unseal(&raw).is_err());
	}

	#[test]
	fn short_iv_is_rejected_without_panicking() {
		let store = store_in(&scratch_dir("short-iv"));
		let raw = serde_json::to_vec(&EncryptedRecord {
			iv: "00".into(),
			auth_tag: "00".repeat(TAG_LEN),
			data: "00".into(),
		})
		.expect("Envelope should serialize.");

		assert!(store.unseal(&raw).expect_err("Short iv should fail.").contains("iv has 1 bytes"));
	}
}
