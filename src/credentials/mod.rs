//! The Credential Engine (§4.5): API key → JWT exchange and JWKS rotation.

pub mod api_key;
pub mod exchange;
pub mod jwks;

pub use api_key::{ApiKey, ApiKeyStore, InMemoryApiKeyStore};
pub use exchange::{
    CredentialAudit, CredentialAuditOutcome, CredentialAuditSink, CredentialEngine, IssuedToken,
    InMemoryCredentialAuditLog, NullCredentialAuditSink,
};
pub use jwks::{InMemoryJwksStore, JwksEntry, JwksManager, JwksStore, RotationOutcome, RotationReason};
