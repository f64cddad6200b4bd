//! The Tuple Store & Model Registry interface (§4.3). Concrete backends live
//! in [`crate::storage`].

use async_trait::async_trait;
use thiserror::Error;

use super::model::{AuthorizationModel, ModelValidationError, Tuple};

#[derive(Debug, Error, miette::Diagnostic)]
pub enum StoreError {
    #[error("storage error: {message}")]
    #[diagnostic(code(authgraph::authz::store::backend_error))]
    Backend { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    ModelValidation(#[from] ModelValidationError),
}

/// A subject reference: `(type, id)`.
pub type Subject<'a> = (&'a str, &'a str);

#[async_trait]
pub trait TupleStore: Send + Sync {
    async fn find_exact(
        &self,
        entity_type: &str,
        entity_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Option<Tuple>, StoreError>;

    async fn find_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<Tuple>, StoreError>;

    async fn find_by_subjects(&self, subjects: &[Subject<'_>]) -> Result<Vec<Tuple>, StoreError>;

    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<Tuple>, StoreError>;

    async fn count_by_relation(
        &self,
        entity_type: &str,
        relation: &str,
    ) -> Result<usize, StoreError>;

    async fn upsert_tuple(&self, tuple: Tuple) -> Result<(), StoreError>;

    async fn delete_tuple(
        &self,
        entity_type: &str,
        entity_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<(), StoreError>;

    async fn get_model(&self, entity_type: &str) -> Result<AuthorizationModel, StoreError>;

    /// Validates the model and enforces invariant (I5): a relation or
    /// permission may not be removed from a model while tuples or
    /// registration grants still reference it.
    async fn upsert_model(&self, model: AuthorizationModel) -> Result<(), StoreError>;
}
