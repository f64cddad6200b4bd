//! Volatile, in-process tuple store: the default backend, and what every
//! test in this crate runs against.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::authz::model::{AuthorizationModel, Tuple};
use crate::authz::tuple_store::{StoreError, Subject, TupleStore};

#[derive(Default)]
pub struct InMemoryTupleStore {
    tuples: RwLock<Vec<Tuple>>,
    models: RwLock<FxHashMap<String, AuthorizationModel>>,
}

impl InMemoryTupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_match(t: &Tuple, entity_type: &str, entity_id: &str, relation: &str, subject_type: &str, subject_id: &str) -> bool {
        t.entity_type == entity_type
            && (t.entity_id == entity_id || t.is_wildcard())
            && t.relation == relation
            && t.subject_type == subject_type
            && t.subject_id == subject_id
    }
}

#[async_trait]
impl TupleStore for InMemoryTupleStore {
    async fn find_exact(
        &self,
        entity_type: &str,
        entity_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Option<Tuple>, StoreError> {
        let tuples = self.tuples.read();
        // Exact entity match takes priority over a wildcard grant.
        let exact = tuples.iter().find(|t| {
            t.entity_type == entity_type
                && t.entity_id == entity_id
                && t.relation == relation
                && t.subject_type == subject_type
                && t.subject_id == subject_id
        });
        if let Some(t) = exact {
            return Ok(Some(t.clone()));
        }
        Ok(tuples
            .iter()
            .find(|t| Self::key_match(t, entity_type, entity_id, relation, subject_type, subject_id) && t.is_wildcard())
            .cloned())
    }

    async fn find_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<Tuple>, StoreError> {
        Ok(self
            .tuples
            .read()
            .iter()
            .filter(|t| t.subject_type == subject_type && t.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn find_by_subjects(&self, subjects: &[Subject<'_>]) -> Result<Vec<Tuple>, StoreError> {
        let tuples = self.tuples.read();
        Ok(tuples
            .iter()
            .filter(|t| {
                subjects
                    .iter()
                    .any(|(ty, id)| t.subject_type == *ty && t.subject_id == *id)
            })
            .cloned()
            .collect())
    }

    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<Tuple>, StoreError> {
        Ok(self
            .tuples
            .read()
            .iter()
            .filter(|t| t.entity_type == entity_type && t.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn count_by_relation(
        &self,
        entity_type: &str,
        relation: &str,
    ) -> Result<usize, StoreError> {
        Ok(self
            .tuples
            .read()
            .iter()
            .filter(|t| t.entity_type == entity_type && t.relation == relation)
            .count())
    }

    async fn upsert_tuple(&self, tuple: Tuple) -> Result<(), StoreError> {
        let mut tuples = self.tuples.write();
        if let Some(existing) = tuples.iter_mut().find(|t| {
            t.entity_type == tuple.entity_type
                && t.entity_id == tuple.entity_id
                && t.relation == tuple.relation
                && t.subject_type == tuple.subject_type
                && t.subject_id == tuple.subject_id
        }) {
            *existing = tuple;
        } else {
            tuples.push(tuple);
        }
        Ok(())
    }

    async fn delete_tuple(
        &self,
        entity_type: &str,
        entity_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<(), StoreError> {
        self.tuples.write().retain(|t| {
            !(t.entity_type == entity_type
                && t.entity_id == entity_id
                && t.relation == relation
                && t.subject_type == subject_type
                && t.subject_id == subject_id)
        });
        Ok(())
    }

    async fn get_model(&self, entity_type: &str) -> Result<AuthorizationModel, StoreError> {
        Ok(self
            .models
            .read()
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| AuthorizationModel::system_fallback(entity_type)))
    }

    async fn upsert_model(&self, model: AuthorizationModel) -> Result<(), StoreError> {
        model.validate()?;

        let existing = self.models.read().get(&model.entity_type).cloned();
        if let Some(existing) = existing {
            for (name, _) in existing.relations.iter() {
                if !model.relations.contains_key(name) {
                    let tuple_count = self.count_by_relation(&model.entity_type, name).await?;
                    if tuple_count > 0 {
                        return Err(crate::authz::model::ModelValidationError::RelationInUse {
                            relation: name.clone(),
                            tuple_count,
                            grant_count: 0,
                        }
                        .into());
                    }
                }
            }
        }

        self.models
            .write()
            .insert(model.entity_type.clone(), model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_tuple_lookup_prefers_exact_over_wildcard() {
        let store = InMemoryTupleStore::new();
        store
            .upsert_tuple(Tuple::new("doc", "*", "viewer", "user", "u1"))
            .await
            .unwrap();
        store
            .upsert_tuple(Tuple::new("doc", "d1", "viewer", "user", "u1"))
            .await
            .unwrap();

        let found = store
            .find_exact("doc", "d1", "viewer", "user", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.entity_id, "d1");
    }

    #[tokio::test]
    async fn wildcard_tuple_matches_any_entity_id() {
        let store = InMemoryTupleStore::new();
        store
            .upsert_tuple(Tuple::new("doc", "*", "viewer", "user", "u1"))
            .await
            .unwrap();
        let found = store
            .find_exact("doc", "d99", "viewer", "user", "u1")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn upsert_model_rejects_removing_relation_in_use() {
        let store = InMemoryTupleStore::new();
        let mut model = AuthorizationModel::system_fallback("doc");
        model.entity_type = "doc".to_string();
        store.upsert_model(model.clone()).await.unwrap();

        store
            .upsert_tuple(Tuple::new("doc", "d1", "viewer", "user", "u1"))
            .await
            .unwrap();

        let mut stripped = model.clone();
        stripped.relations.remove("viewer");
        stripped.permissions.remove("read");
        let err = store.upsert_model(stripped).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn get_model_falls_back_to_system_model_when_unregistered() {
        let store = InMemoryTupleStore::new();
        let model = store.get_model("doc").await.unwrap();
        assert!(model.relations.contains_key("viewer"));
    }
}
