//! Secrets Vault: AEAD-encrypted secret storage keyed off a single platform
//! secret.
//!
//! Values are stored as `iv.ciphertext.authTag`, each segment base64url
//! encoded, where `iv` is a random 96-bit AES-GCM nonce and `authTag` is the
//! 128-bit authentication tag GCM appends to the ciphertext. The encryption
//! key is the platform secret padded with zero bytes (or truncated) to
//! exactly 32 bytes — deliberately simpler than a KDF, since the vault's
//! threat model is "protect at rest", not "derive a key from a low-entropy
//! passphrase".

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use rand::RngCore;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum SecretsError {
    #[error("secret name must match [A-Z0-9_]+, got `{name}`")]
    #[diagnostic(code(authgraph::secrets::invalid_name))]
    InvalidName { name: String },

    #[error("secret `{name}` already exists")]
    #[diagnostic(code(authgraph::secrets::conflict))]
    AlreadyExists { name: String },

    #[error("encryption failed")]
    #[diagnostic(code(authgraph::secrets::encrypt_failed))]
    EncryptFailed,
}

fn validate_name(name: &str) -> Result<(), SecretsError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SecretsError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// Derives the 32-byte AES-256 key from the platform secret by padding with
/// zero bytes or truncating, per the vault's design.
fn derive_key(platform_secret: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    let len = platform_secret.len().min(32);
    key[..len].copy_from_slice(&platform_secret[..len]);
    key
}

fn encrypt(platform_secret: &[u8], plaintext: &str) -> Result<String, SecretsError> {
    let key_bytes = derive_key(platform_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut combined = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| SecretsError::EncryptFailed)?;
    // aes-gcm appends the 16-byte tag to the ciphertext; split it back out so
    // the stored format is `iv.ciphertext.authTag` rather than `iv.ciphertext+tag`.
    let tag = combined.split_off(combined.len() - 16);

    Ok(format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(nonce_bytes),
        URL_SAFE_NO_PAD.encode(&combined),
        URL_SAFE_NO_PAD.encode(&tag),
    ))
}

fn decrypt(platform_secret: &[u8], stored: &str) -> Option<String> {
    let mut parts = stored.splitn(3, '.');
    let iv = parts.next()?;
    let ciphertext = parts.next()?;
    let tag = parts.next()?;

    let nonce_bytes = URL_SAFE_NO_PAD.decode(iv).ok()?;
    let mut combined = URL_SAFE_NO_PAD.decode(ciphertext).ok()?;
    let tag_bytes = URL_SAFE_NO_PAD.decode(tag).ok()?;
    combined.extend_from_slice(&tag_bytes);

    let key_bytes = derive_key(platform_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = cipher.decrypt(nonce, combined.as_ref()).ok()?;
    String::from_utf8(plaintext).ok()
}

#[derive(Debug, Clone)]
struct StoredSecret {
    encrypted_value: String,
    description: Option<String>,
}

/// In-process secrets store. A production deployment backs this with a
/// durable table; the encryption scheme is independent of the backing store,
/// so this type is useful standalone for tests and for embedding.
pub struct SecretsVault {
    platform_secret: Vec<u8>,
    secrets: RwLock<FxHashMap<String, StoredSecret>>,
}

impl SecretsVault {
    pub fn new(platform_secret: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            platform_secret: platform_secret.into(),
            secrets: RwLock::new(FxHashMap::default()),
        })
    }

    #[instrument(skip(self, value), fields(secret.name = %name))]
    pub fn create_secret(
        &self,
        name: &str,
        value: &str,
        description: Option<String>,
    ) -> Result<(), SecretsError> {
        validate_name(name)?;
        let mut secrets = self.secrets.write();
        if secrets.contains_key(name) {
            return Err(SecretsError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let encrypted_value = encrypt(&self.platform_secret, value)?;
        secrets.insert(
            name.to_string(),
            StoredSecret {
                encrypted_value,
                description,
            },
        );
        Ok(())
    }

    /// Returns the plaintext value, or `None` if the secret is missing or
    /// fails to decrypt. Decryption failures are logged, never propagated.
    #[instrument(skip(self), fields(secret.name = %name))]
    pub fn get_secret_value(&self, name: &str) -> Option<String> {
        let encrypted = {
            let secrets = self.secrets.read();
            secrets.get(name)?.encrypted_value.clone()
        };
        match decrypt(&self.platform_secret, &encrypted) {
            Some(plaintext) => Some(plaintext),
            None => {
                tracing::warn!(secret.name = %name, "secret decryption failed");
                None
            }
        }
    }

    /// Rotation is "create new then delete old" under a different name; the
    /// vault does not version values in place.
    pub fn rotate_secret(
        &self,
        old_name: &str,
        new_name: &str,
        new_value: &str,
    ) -> Result<(), SecretsError> {
        let description = self
            .secrets
            .read()
            .get(old_name)
            .and_then(|s| s.description.clone());
        self.create_secret(new_name, new_value, description)?;
        self.secrets.write().remove(old_name);
        Ok(())
    }

    pub fn delete_secret(&self, name: &str) {
        self.secrets.write().remove(name);
    }

    /// Encrypts `plaintext` under the platform secret directly, bypassing the
    /// named-secret store. Used by the credential engine to seal JWKS private
    /// key material and by the webhook fabric to seal endpoint secrets.
    pub fn encrypt_with_platform_secret(&self, plaintext: &str) -> Result<String, SecretsError> {
        encrypt(&self.platform_secret, plaintext)
    }

    /// Decrypts a value produced by [`Self::encrypt_with_platform_secret`].
    /// Returns `None` on any decryption failure; never panics or logs the
    /// plaintext.
    pub fn decrypt_with_platform_secret(&self, stored: &str) -> Option<String> {
        decrypt(&self.platform_secret, stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_encrypt_decrypt() {
        let stored = encrypt(b"platform-secret", "hello world").unwrap();
        assert_eq!(decrypt(b"platform-secret", &stored).unwrap(), "hello world");
    }

    #[test]
    fn bitflip_fails_to_decrypt() {
        let mut stored = encrypt(b"platform-secret", "hello world").unwrap();
        // Flip a character in the ciphertext segment.
        let mid = stored.len() / 2;
        let mut bytes: Vec<u8> = stored.into_bytes();
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        stored = String::from_utf8(bytes).unwrap();
        assert!(decrypt(b"platform-secret", &stored).is_none());
    }

    #[test]
    fn vault_rejects_invalid_name() {
        let vault = SecretsVault::new(b"platform-secret".to_vec());
        let err = vault.create_secret("lower_case", "x", None).unwrap_err();
        assert!(matches!(err, SecretsError::InvalidName { .. }));
    }

    #[test]
    fn vault_round_trips_through_get_secret_value() {
        let vault = SecretsVault::new(b"platform-secret".to_vec());
        vault.create_secret("STRIPE_KEY", "sk_live_abc", None).unwrap();
        assert_eq!(vault.get_secret_value("STRIPE_KEY").unwrap(), "sk_live_abc");
        assert!(vault.get_secret_value("MISSING").is_none());
    }

    #[test]
    fn rotate_moves_value_to_new_name() {
        let vault = SecretsVault::new(b"platform-secret".to_vec());
        vault.create_secret("OLD_KEY", "v1", None).unwrap();
        vault.rotate_secret("OLD_KEY", "NEW_KEY", "v2").unwrap();
        assert!(vault.get_secret_value("OLD_KEY").is_none());
        assert_eq!(vault.get_secret_value("NEW_KEY").unwrap(), "v2");
    }
}
