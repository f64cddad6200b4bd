//! API keys: the long-lived credential exchanged for a short-lived JWT.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub key: String,
    pub user_id: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, CoreError>;
}

#[derive(Default)]
pub struct InMemoryApiKeyStore {
    keys: RwLock<Vec<ApiKey>>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, key: ApiKey) {
        self.keys.write().push(key);
    }

    pub fn deactivate(&self, id: &str) {
        if let Some(key) = self.keys.write().iter_mut().find(|k| k.id == id) {
            key.active = false;
        }
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, CoreError> {
        Ok(self.keys.read().iter().find(|k| k.key == key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_key_is_invalid() {
        let key = ApiKey {
            id: "ak_1".into(),
            key: "secret".into(),
            user_id: "u1".into(),
            active: true,
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
        };
        assert!(!key.is_valid(Utc::now()));
    }

    #[test]
    fn inactive_key_is_invalid_even_without_expiry() {
        let key = ApiKey {
            id: "ak_1".into(),
            key: "secret".into(),
            user_id: "u1".into(),
            active: false,
            expires_at: None,
        };
        assert!(!key.is_valid(Utc::now()));
    }

    #[tokio::test]
    async fn store_finds_by_opaque_key_value() {
        let store = InMemoryApiKeyStore::new();
        store.insert(ApiKey {
            id: "ak_1".into(),
            key: "secret".into(),
            user_id: "u1".into(),
            active: true,
            expires_at: None,
        });
        let found = store.find_by_key("secret").await.unwrap();
        assert_eq!(found.unwrap().user_id, "u1");
        assert!(store.find_by_key("missing").await.unwrap().is_none());
    }
}
