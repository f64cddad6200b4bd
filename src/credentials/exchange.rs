//! API key → JWT exchange (§4.5): verify the key, resolve the holder's
//! permissions, and sign a short-lived RS256 token under the latest JWKS
//! entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::instrument;

use super::api_key::ApiKeyStore;
use super::jwks::JwksManager;
use crate::authz::engine::AuthorizationEngine;
use crate::config::AppConfig;
use crate::error::CoreError;
use crate::metrics::Metrics;

const EXCHANGE_SCOPE: &str = "api_key_exchange";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialAuditOutcome {
    Success,
    InvalidApiKey,
    InternalError,
}

#[derive(Debug, Clone)]
pub struct CredentialAudit {
    pub at: DateTime<Utc>,
    pub ip: Option<String>,
    pub api_key_id: Option<String>,
    pub user_id: Option<String>,
    pub outcome: CredentialAuditOutcome,
}

pub trait CredentialAuditSink: Send + Sync {
    fn record(&self, audit: CredentialAudit);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCredentialAuditSink;

impl CredentialAuditSink for NullCredentialAuditSink {
    fn record(&self, _audit: CredentialAudit) {}
}

#[derive(Default, Clone)]
pub struct InMemoryCredentialAuditLog {
    entries: Arc<Mutex<Vec<CredentialAudit>>>,
}

impl InMemoryCredentialAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CredentialAudit> {
        self.entries.lock().clone()
    }
}

impl CredentialAuditSink for InMemoryCredentialAuditLog {
    fn record(&self, audit: CredentialAudit) {
        self.entries.lock().push(audit);
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub key_id: String,
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    scope: &'static str,
    #[serde(rename = "apiKeyId")]
    api_key_id: String,
    permissions: FxHashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    abac_required: Option<FxHashMap<String, Vec<String>>>,
}

/// The Credential Engine: ties the API key store, JWKS manager, and
/// authorization engine's permission resolver together into one exchange.
pub struct CredentialEngine {
    api_keys: Arc<dyn ApiKeyStore>,
    jwks: Arc<JwksManager>,
    authz: Arc<AuthorizationEngine>,
    metrics: Metrics,
    audit: Arc<dyn CredentialAuditSink>,
    config: AppConfig,
}

impl CredentialEngine {
    pub fn new(
        api_keys: Arc<dyn ApiKeyStore>,
        jwks: Arc<JwksManager>,
        authz: Arc<AuthorizationEngine>,
    ) -> Self {
        Self {
            api_keys,
            jwks,
            authz,
            metrics: Metrics::null(),
            audit: Arc::new(NullCredentialAuditSink),
            config: AppConfig::default(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn CredentialAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// `exchange(apiKey) -> JWT`. Every outcome, including failure, is
    /// audit-logged with the caller's IP.
    #[instrument(skip(self, api_key, ip))]
    pub async fn exchange_api_key_for_jwt(
        &self,
        api_key: &str,
        now: DateTime<Utc>,
        ip: Option<String>,
    ) -> Result<IssuedToken, CoreError> {
        let key = self.api_keys.find_by_key(api_key).await?;
        let key = match key {
            Some(key) if key.is_valid(now) => key,
            _ => {
                self.metrics
                    .count("credentials.exchange.count", &[("outcome", "invalid_api_key")]);
                self.audit.record(CredentialAudit {
                    at: now,
                    ip,
                    api_key_id: None,
                    user_id: None,
                    outcome: CredentialAuditOutcome::InvalidApiKey,
                });
                return Err(CoreError::InvalidApiKey);
            }
        };

        let resolved = self
            .authz
            .resolve_all_permissions_with_abac_info(&key.user_id)
            .await
            .map_err(|_| self.internal_error(now, ip.clone(), Some(key.id.clone()), Some(key.user_id.clone())))?;

        let entry = self
            .jwks
            .store()
            .latest()
            .await?
            .ok_or_else(|| self.internal_error(now, ip.clone(), Some(key.id.clone()), Some(key.user_id.clone())))?;

        let private_pem = self
            .jwks
            .decrypt_private_key(&entry)
            .ok_or_else(|| self.internal_error(now, ip.clone(), Some(key.id.clone()), Some(key.user_id.clone())))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|_| self.internal_error(now, ip.clone(), Some(key.id.clone()), Some(key.user_id.clone())))?;

        let iat = now.timestamp();
        let exp = iat + self.config.jwt_ttl.as_secs() as i64;
        let abac_required = if resolved.abac_required.is_empty() {
            None
        } else {
            Some(resolved.abac_required)
        };
        let claims = Claims {
            sub: key.user_id.clone(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
            iat,
            exp,
            scope: EXCHANGE_SCOPE,
            api_key_id: key.id.clone(),
            permissions: resolved.permissions,
            abac_required,
        };

        let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(entry.id.clone());

        let token = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|_| self.internal_error(now, ip.clone(), Some(key.id.clone()), Some(key.user_id.clone())))?;

        self.metrics
            .count("credentials.exchange.count", &[("outcome", "success")]);
        self.audit.record(CredentialAudit {
            at: now,
            ip,
            api_key_id: Some(key.id.clone()),
            user_id: Some(key.user_id.clone()),
            outcome: CredentialAuditOutcome::Success,
        });

        Ok(IssuedToken {
            token,
            expires_at: DateTime::<Utc>::from_timestamp(exp, 0).unwrap_or(now),
            key_id: entry.id,
        })
    }

    fn internal_error(
        &self,
        at: DateTime<Utc>,
        ip: Option<String>,
        api_key_id: Option<String>,
        user_id: Option<String>,
    ) -> CoreError {
        self.metrics
            .count("credentials.exchange.count", &[("outcome", "internal_error")]);
        self.audit.record(CredentialAudit {
            at,
            ip,
            api_key_id,
            user_id,
            outcome: CredentialAuditOutcome::InternalError,
        });
        CoreError::InternalError {
            message: "credential exchange failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::api_key::{ApiKey, InMemoryApiKeyStore};
    use super::super::jwks::InMemoryJwksStore;
    use super::*;
    use crate::authz::tuple_store::TupleStore;
    use crate::secrets::SecretsVault;
    use crate::storage::memory::InMemoryTupleStore;

    async fn engine() -> (CredentialEngine, Arc<InMemoryApiKeyStore>) {
        let store: Arc<dyn TupleStore> = Arc::new(InMemoryTupleStore::new());
        let authz = Arc::new(AuthorizationEngine::new(store));
        let vault = SecretsVault::new(b"platform-secret".to_vec());
        let jwks = Arc::new(JwksManager::new(Arc::new(InMemoryJwksStore::new()), vault));
        jwks.rotate_if_needed(Utc::now()).await.unwrap();

        let api_keys = InMemoryApiKeyStore::new();
        api_keys.insert(ApiKey {
            id: "ak_1".into(),
            key: "sk_live_test".into(),
            user_id: "user:u1".into(),
            active: true,
            expires_at: None,
        });

        (
            CredentialEngine::new(api_keys.clone(), jwks, authz),
            api_keys,
        )
    }

    #[tokio::test]
    async fn valid_key_yields_a_signed_token() {
        let (engine, _keys) = engine().await;
        let issued = engine
            .exchange_api_key_for_jwt("sk_live_test", Utc::now(), Some("127.0.0.1".to_string()))
            .await
            .unwrap();
        assert!(issued.token.split('.').count() == 3);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let (engine, _keys) = engine().await;
        let err = engine
            .exchange_api_key_for_jwt("not_a_real_key", Utc::now(), None)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidApiKey);
    }

    #[tokio::test]
    async fn deactivated_key_is_rejected() {
        let (engine, keys) = engine().await;
        keys.deactivate("ak_1");
        let err = engine
            .exchange_api_key_for_jwt("sk_live_test", Utc::now(), None)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidApiKey);
    }
}
