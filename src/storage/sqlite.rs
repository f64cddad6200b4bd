//! SQLite-backed tuple store and model registry, persisting the composite
//! index named in §6 (`entityType, entityId, relation, subjectType,
//! subjectId`) and one JSON-serialized authorization model per entity type.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::authz::model::{AuthorizationModel, Tuple};
use crate::authz::tuple_store::{StoreError, Subject, TupleStore};

pub struct SqliteTupleStore {
    pool: SqlitePool,
}

impl SqliteTupleStore {
    /// Connects (creating the file if needed) and ensures the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tuples (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                relation TEXT NOT NULL,
                subject_type TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                subject_relation TEXT,
                condition TEXT,
                PRIMARY KEY (entity_type, entity_id, relation, subject_type, subject_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tuples_subject ON tuples (subject_type, subject_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorization_models (
                entity_type TEXT PRIMARY KEY,
                definition_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }
}

fn backend_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: e.to_string(),
    }
}

fn row_to_tuple(row: &sqlx::sqlite::SqliteRow) -> Tuple {
    Tuple {
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        relation: row.get("relation"),
        subject_type: row.get("subject_type"),
        subject_id: row.get("subject_id"),
        subject_relation: row.get("subject_relation"),
        condition: row.get("condition"),
    }
}

#[async_trait]
impl TupleStore for SqliteTupleStore {
    async fn find_exact(
        &self,
        entity_type: &str,
        entity_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Option<Tuple>, StoreError> {
        let exact = sqlx::query(
            "SELECT * FROM tuples WHERE entity_type = ? AND entity_id = ? AND relation = ? AND subject_type = ? AND subject_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        if let Some(row) = exact {
            return Ok(Some(row_to_tuple(&row)));
        }

        let wildcard = sqlx::query(
            "SELECT * FROM tuples WHERE entity_type = ? AND entity_id = '*' AND relation = ? AND subject_type = ? AND subject_id = ?",
        )
        .bind(entity_type)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(wildcard.as_ref().map(row_to_tuple))
    }

    async fn find_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<Tuple>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tuples WHERE subject_type = ? AND subject_id = ?")
            .bind(subject_type)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(rows.iter().map(row_to_tuple).collect())
    }

    async fn find_by_subjects(&self, subjects: &[Subject<'_>]) -> Result<Vec<Tuple>, StoreError> {
        // sqlx doesn't support binding a dynamic IN-list portably across
        // backends without a query builder; fan out one lookup per subject
        // and merge, which is fine at the small cardinalities subject
        // expansion produces.
        let mut found = Vec::new();
        for (subject_type, subject_id) in subjects {
            found.extend(self.find_by_subject(subject_type, subject_id).await?);
        }
        Ok(found)
    }

    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<Tuple>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tuples WHERE entity_type = ? AND entity_id = ?")
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(rows.iter().map(row_to_tuple).collect())
    }

    async fn count_by_relation(
        &self,
        entity_type: &str,
        relation: &str,
    ) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM tuples WHERE entity_type = ? AND relation = ?")
            .bind(entity_type)
            .bind(relation)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }

    async fn upsert_tuple(&self, tuple: Tuple) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tuples (entity_type, entity_id, relation, subject_type, subject_id, subject_relation, condition)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (entity_type, entity_id, relation, subject_type, subject_id)
            DO UPDATE SET subject_relation = excluded.subject_relation, condition = excluded.condition
            "#,
        )
        .bind(&tuple.entity_type)
        .bind(&tuple.entity_id)
        .bind(&tuple.relation)
        .bind(&tuple.subject_type)
        .bind(&tuple.subject_id)
        .bind(&tuple.subject_relation)
        .bind(&tuple.condition)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
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
        sqlx::query(
            "DELETE FROM tuples WHERE entity_type = ? AND entity_id = ? AND relation = ? AND subject_type = ? AND subject_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_model(&self, entity_type: &str) -> Result<AuthorizationModel, StoreError> {
        let row = sqlx::query("SELECT definition_json FROM authorization_models WHERE entity_type = ?")
            .bind(entity_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        match row {
            Some(row) => {
                let json: String = row.get("definition_json");
                serde_json::from_str(&json).map_err(|e| StoreError::Backend {
                    message: format!("corrupt model for `{entity_type}`: {e}"),
                })
            }
            None => Ok(AuthorizationModel::system_fallback(entity_type)),
        }
    }

    async fn upsert_model(&self, model: AuthorizationModel) -> Result<(), StoreError> {
        model.validate()?;

        let existing = self.get_model(&model.entity_type).await.ok();
        if let Some(existing) = existing {
            for name in existing.relations.keys() {
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

        let json = serde_json::to_string(&model).map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })?;
        sqlx::query(
            r#"
            INSERT INTO authorization_models (entity_type, definition_json) VALUES (?, ?)
            ON CONFLICT (entity_type) DO UPDATE SET definition_json = excluded.definition_json
            "#,
        )
        .bind(&model.entity_type)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }
}
