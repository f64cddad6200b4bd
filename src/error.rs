//! Top-level error taxonomy.
//!
//! Internal engines ([`crate::authz`], [`crate::pipeline`]) never propagate
//! [`CoreError`] to their callers — they convert failures into verdict/outcome
//! enums instead, per the authorization and pipeline error-handling design.
//! [`CoreError`] is surfaced only at the credential exchange and webhook
//! ingress boundaries, ready to be mapped to transport status codes by a
//! thin, non-core HTTP layer.

use miette::Diagnostic;
use thiserror::Error;

/// The stable error kinds named by the error handling design.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unauthenticated")]
    #[diagnostic(code(authgraph::unauthenticated))]
    Unauthenticated,

    #[error("invalid api key")]
    #[diagnostic(code(authgraph::invalid_api_key))]
    InvalidApiKey,

    #[error("forbidden")]
    #[diagnostic(code(authgraph::forbidden))]
    Forbidden,

    #[error("invalid request: {message}")]
    #[diagnostic(code(authgraph::invalid_request))]
    InvalidRequest { message: String },

    #[error("not found: {what}")]
    #[diagnostic(code(authgraph::not_found))]
    NotFound { what: String },

    #[error("conflict: {message}")]
    #[diagnostic(code(authgraph::conflict))]
    Conflict { message: String },

    #[error("policy denied")]
    #[diagnostic(code(authgraph::policy_denied))]
    PolicyDenied,

    #[error("policy evaluation timed out")]
    #[diagnostic(code(authgraph::policy_timeout))]
    PolicyTimeout,

    #[error("policy evaluation error: {message}")]
    #[diagnostic(code(authgraph::policy_error))]
    PolicyError { message: String },

    #[error("sandbox unavailable")]
    #[diagnostic(
        code(authgraph::sandbox_unavailable),
        help("the sandbox pool is saturated; retry after backoff")
    )]
    SandboxUnavailable,

    #[error("storage error: {message}")]
    #[diagnostic(code(authgraph::storage_error))]
    StorageError { message: String },

    #[error("signature invalid")]
    #[diagnostic(code(authgraph::signature_invalid))]
    SignatureInvalid,

    #[error("duplicate delivery")]
    #[diagnostic(code(authgraph::idempotency_duplicate))]
    IdempotencyDuplicate,

    #[error("integration error: {message}")]
    #[diagnostic(code(authgraph::integration_error))]
    IntegrationError { message: String },

    #[error("internal error: {message}")]
    #[diagnostic(code(authgraph::internal_error))]
    InternalError { message: String },
}

impl CoreError {
    /// The stable string code used in API error bodies, independent of the
    /// `Display` message (which may carry request-specific detail).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated => "unauthenticated",
            CoreError::InvalidApiKey => "invalid_api_key",
            CoreError::Forbidden => "forbidden",
            CoreError::InvalidRequest { .. } => "invalid_request",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Conflict { .. } => "conflict",
            CoreError::PolicyDenied => "policy_denied",
            CoreError::PolicyTimeout => "policy_timeout",
            CoreError::PolicyError { .. } => "policy_error",
            CoreError::SandboxUnavailable => "sandbox_unavailable",
            CoreError::StorageError { .. } => "storage_error",
            CoreError::SignatureInvalid => "signature_invalid",
            CoreError::IdempotencyDuplicate => "idempotency_duplicate",
            CoreError::IntegrationError { .. } => "integration_error",
            CoreError::InternalError { .. } => "internal_error",
        }
    }

    /// Whether the failure is safe to retry against a downstream collaborator
    /// (used by the webhook fabric to classify transient vs. permanent
    /// delivery failures).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::IntegrationError { .. } | CoreError::SandboxUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_independent_of_message() {
        let a = CoreError::NotFound {
            what: "user u1".into(),
        };
        let b = CoreError::NotFound {
            what: "secret FOO".into(),
        };
        assert_eq!(a.code(), b.code());
        assert_eq!(a.code(), "not_found");
    }
}
