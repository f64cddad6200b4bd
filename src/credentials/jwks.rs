//! JWKS rotation (§4.5): the invariant is that the most recently created
//! entry is always "latest"; `rotate_if_needed` creates a new key pair when
//! missing or stale, then prunes everything outside the retention window
//! except whichever entry is currently latest.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::instrument;

use crate::config::AppConfig;
use crate::error::CoreError;
use crate::ids::IdGenerator;
use crate::metrics::Metrics;
use crate::secrets::SecretsVault;

const RSA_KEY_BITS: usize = 2048;

/// A signing key pair. The private half is sealed under the platform secret
/// and never held in plaintext outside of [`JwksManager::decrypt_private_key`].
#[derive(Debug, Clone)]
pub struct JwksEntry {
    pub id: String,
    pub public_key_pem: String,
    pub private_key_encrypted: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait JwksStore: Send + Sync {
    async fn insert(&self, entry: JwksEntry) -> Result<(), CoreError>;
    async fn latest(&self) -> Result<Option<JwksEntry>, CoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<JwksEntry>, CoreError>;
    async fn all(&self) -> Result<Vec<JwksEntry>, CoreError>;
    async fn delete(&self, id: &str) -> Result<(), CoreError>;
}

/// In-memory JWKS table, ordered implicitly by scanning `created_at`.
#[derive(Default)]
pub struct InMemoryJwksStore {
    entries: RwLock<Vec<JwksEntry>>,
}

impl InMemoryJwksStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JwksStore for InMemoryJwksStore {
    async fn insert(&self, entry: JwksEntry) -> Result<(), CoreError> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn latest(&self) -> Result<Option<JwksEntry>, CoreError> {
        Ok(self
            .entries
            .read()
            .iter()
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JwksEntry>, CoreError> {
        Ok(self.entries.read().iter().find(|e| e.id == id).cloned())
    }

    async fn all(&self) -> Result<Vec<JwksEntry>, CoreError> {
        Ok(self.entries.read().clone())
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        self.entries.write().retain(|e| e.id != id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    MissingKey,
    IntervalElapsed,
}

impl RotationReason {
    pub fn label(self) -> &'static str {
        match self {
            RotationReason::MissingKey => "missing_key",
            RotationReason::IntervalElapsed => "interval_elapsed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub rotated: bool,
    pub reason: Option<RotationReason>,
    pub pruned: usize,
    pub active_key_id: String,
}

/// Owns key generation, sealing, and the rotation/pruning schedule.
pub struct JwksManager {
    store: Arc<dyn JwksStore>,
    vault: Arc<SecretsVault>,
    ids: IdGenerator,
    metrics: Metrics,
    rotation_interval: Duration,
    retention_window: Duration,
}

impl JwksManager {
    pub fn new(store: Arc<dyn JwksStore>, vault: Arc<SecretsVault>) -> Self {
        let config = AppConfig::default();
        Self {
            store,
            vault,
            ids: IdGenerator::new(),
            metrics: Metrics::null(),
            rotation_interval: chrono_duration(config.jwks_rotation_interval),
            retention_window: chrono_duration(config.jwks_retention_window),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.rotation_interval = chrono_duration(config.jwks_rotation_interval);
        self.retention_window = chrono_duration(config.jwks_retention_window);
        self
    }

    pub fn store(&self) -> &Arc<dyn JwksStore> {
        &self.store
    }

    /// Decrypts the entry's private key for signing. Callers must not cache
    /// the returned PEM.
    pub fn decrypt_private_key(&self, entry: &JwksEntry) -> Option<String> {
        self.vault
            .decrypt_with_platform_secret(&entry.private_key_encrypted)
    }

    #[instrument(skip(self))]
    pub async fn rotate_if_needed(&self, now: DateTime<Utc>) -> Result<RotationOutcome, CoreError> {
        let started = Instant::now();
        let latest = self.store.latest().await?;
        let reason = match &latest {
            None => Some(RotationReason::MissingKey),
            Some(entry) if now - entry.created_at >= self.rotation_interval => {
                Some(RotationReason::IntervalElapsed)
            }
            Some(_) => None,
        };

        let active_id = if let Some(reason) = reason {
            let entry = self.generate_entry(now)?;
            let id = entry.id.clone();
            self.store.insert(entry).await?;
            self.metrics
                .count("credentials.jwks.rotation.count", &[("reason", reason.label())]);
            id
        } else {
            latest
                .as_ref()
                .map(|e| e.id.clone())
                .expect("reason is None only when a latest entry exists")
        };

        let cutoff = now - self.retention_window;
        let mut pruned = 0;
        for entry in self.store.all().await? {
            if entry.id != active_id && entry.created_at <= cutoff {
                self.store.delete(&entry.id).await?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            self.metrics.count("credentials.jwks.pruned.count", &[]);
        }

        if let Some(entry) = self.store.find_by_id(&active_id).await? {
            let age_ms = (now - entry.created_at).num_milliseconds() as f64;
            self.metrics
                .gauge("credentials.jwks.active_key.age_ms", age_ms, &[]);
        }

        self.metrics.duration_ms(
            "credentials.jwks.rotation.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            &[],
        );

        Ok(RotationOutcome {
            rotated: reason.is_some(),
            reason,
            pruned,
            active_key_id: active_id,
        })
    }

    fn generate_entry(&self, now: DateTime<Utc>) -> Result<JwksEntry, CoreError> {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS).map_err(|e| {
            CoreError::InternalError {
                message: format!("jwks key generation failed: {e}"),
            }
        })?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CoreError::InternalError {
                message: format!("jwks private key encoding failed: {e}"),
            })?;
        let public_pem = public_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CoreError::InternalError {
                message: format!("jwks public key encoding failed: {e}"),
            })?;

        let private_key_encrypted = self
            .vault
            .encrypt_with_platform_secret(private_pem.as_str())
            .map_err(|_| CoreError::InternalError {
                message: "failed to seal jwks private key".to_string(),
            })?;

        Ok(JwksEntry {
            id: self.ids.generate_jwks_id(),
            public_key_pem: public_pem,
            private_key_encrypted,
            created_at: now,
        })
    }
}

fn chrono_duration(std_duration: std::time::Duration) -> Duration {
    Duration::seconds(std_duration.as_secs() as i64)
}
