//! End-to-end credential exchange: seed a permission tuple, rotate JWKS,
//! exchange an API key for a JWT, and verify the token decodes under the
//! rotated public key with the claims the exchange is supposed to carry.

use std::sync::Arc;

use authgraph::authz::{AuthorizationEngine, AuthorizationModel, Tuple, TupleStore};
use authgraph::credentials::{ApiKey, CredentialEngine, InMemoryApiKeyStore, InMemoryJwksStore, JwksManager};
use authgraph::secrets::SecretsVault;
use authgraph::storage::memory::InMemoryTupleStore;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

#[derive(Deserialize)]
struct DecodedClaims {
    sub: String,
    #[serde(rename = "apiKeyId")]
    api_key_id: String,
    permissions: std::collections::HashMap<String, Vec<String>>,
}

#[tokio::test]
async fn exchange_issues_a_token_decodable_under_the_rotated_public_key() {
    let store: Arc<dyn TupleStore> = Arc::new(InMemoryTupleStore::new());
    store
        .upsert_model(AuthorizationModel::system_fallback("doc"))
        .await
        .unwrap();
    store
        .upsert_tuple(Tuple::new("doc", "d1", "owner", "user", "u1"))
        .await
        .unwrap();
    let authz = Arc::new(AuthorizationEngine::new(store));

    let vault = SecretsVault::new(b"platform-secret".to_vec());
    let jwks = Arc::new(JwksManager::new(Arc::new(InMemoryJwksStore::new()), vault));
    let rotation = jwks.rotate_if_needed(Utc::now()).await.unwrap();
    assert!(rotation.rotated);

    let api_keys = InMemoryApiKeyStore::new();
    api_keys.insert(ApiKey {
        id: "ak_1".into(),
        key: "sk_live_abcdef".into(),
        user_id: "u1".into(),
        active: true,
        expires_at: None,
    });

    let engine = CredentialEngine::new(api_keys, jwks.clone(), authz);
    let issued = engine
        .exchange_api_key_for_jwt("sk_live_abcdef", Utc::now(), Some("203.0.113.1".to_string()))
        .await
        .unwrap();

    let entry = jwks
        .store()
        .find_by_id(&issued.key_id)
        .await
        .unwrap()
        .expect("the issuing key must still be resolvable by id");
    let decoding_key = DecodingKey::from_rsa_pem(entry.public_key_pem.as_bytes()).unwrap();

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;
    let decoded = decode::<DecodedClaims>(&issued.token, &decoding_key, &validation).unwrap();

    assert_eq!(decoded.claims.sub, "u1");
    assert_eq!(decoded.claims.api_key_id, "ak_1");
    assert!(decoded.claims.permissions.get("doc:d1").is_some());
}

#[tokio::test]
async fn rotation_keeps_previously_issued_keys_resolvable_until_retention_expires() {
    let vault = SecretsVault::new(b"platform-secret".to_vec());
    let jwks = JwksManager::new(Arc::new(InMemoryJwksStore::new()), vault);

    let t0 = Utc::now();
    let first = jwks.rotate_if_needed(t0).await.unwrap();
    assert!(first.rotated);
    let first_key_id = first.active_key_id;

    let t1 = t0 + chrono::Duration::days(40);
    let second = jwks.rotate_if_needed(t1).await.unwrap();
    assert!(second.rotated);
    assert_ne!(second.active_key_id, first_key_id);

    // Well within the default 60-day retention window, the prior key is still there.
    assert!(jwks.store().find_by_id(&first_key_id).await.unwrap().is_some());
}
