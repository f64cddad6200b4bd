//! Tuples and authorization models: the declarative data §4.3 persists.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WILDCARD_ENTITY: &str = "*";

/// A single `(entity, relation, subject)` ReBAC record, optionally carrying
/// an ABAC `condition` script evaluated at check time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub entity_type: String,
    pub entity_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    pub condition: Option<String>,
}

impl Tuple {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        relation: impl Into<String>,
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            relation: relation.into(),
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: None,
            condition: None,
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    #[must_use]
    pub fn with_subject_relation(mut self, relation: impl Into<String>) -> Self {
        self.subject_relation = Some(relation.into());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.entity_id == WILDCARD_ENTITY
    }
}

/// A relation's definition: what other relations imply it, and whether it is
/// traversable during subject expansion (e.g. group membership).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelationDef {
    /// Other relation names whose holders also hold this relation.
    #[serde(default)]
    pub union: Vec<String>,
    /// Marks the relation as traversable when expanding "what a subject is".
    #[serde(default)]
    pub hierarchy: bool,
}

/// A permission's definition: the relation it requires, plus an optional
/// ABAC policy that must also pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDef {
    pub relation: String,
    #[serde(default)]
    pub policy_engine: Option<String>,
    #[serde(default)]
    pub policy: Option<String>,
}

/// The declarative mapping from relations/permissions for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthorizationModel {
    pub entity_type: String,
    pub relations: FxHashMap<String, RelationDef>,
    pub permissions: FxHashMap<String, PermissionDef>,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ModelValidationError {
    #[error("permission `{permission}` references undefined relation `{relation}`")]
    #[diagnostic(code(authgraph::authz::model::undefined_relation))]
    UndefinedRelation { permission: String, relation: String },

    #[error("relation `{relation}` unions undefined relation/permission `{target}`")]
    #[diagnostic(code(authgraph::authz::model::undefined_union_target))]
    UndefinedUnionTarget { relation: String, target: String },

    #[error(
        "cannot remove relation `{relation}`: {tuple_count} tuple(s) and {grant_count} registration grant(s) still reference it"
    )]
    #[diagnostic(
        code(authgraph::authz::model::relation_in_use),
        help("delete or migrate the referencing tuples/grants before removing the relation")
    )]
    RelationInUse {
        relation: String,
        tuple_count: usize,
        grant_count: usize,
    },
}

impl AuthorizationModel {
    /// Structural validation implementing SPEC_FULL §11's supplement to
    /// `upsertModel`: every `union` entry must name a relation or permission
    /// defined in the same model, and every permission's `relation` must
    /// exist.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        for (name, permission) in &self.permissions {
            if !self.relations.contains_key(&permission.relation) {
                return Err(ModelValidationError::UndefinedRelation {
                    permission: name.clone(),
                    relation: permission.relation.clone(),
                });
            }
        }
        for (name, relation) in &self.relations {
            for target in &relation.union {
                if !self.relations.contains_key(target) && !self.permissions.contains_key(target) {
                    return Err(ModelValidationError::UndefinedUnionTarget {
                        relation: name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether `relation` is marked hierarchical, with the legacy fallback:
    /// `group:member` is treated as hierarchical even if the model omits the
    /// flag (§4.4 step 4).
    pub fn is_hierarchical(&self, relation: &str) -> bool {
        if let Some(def) = self.relations.get(relation) {
            if def.hierarchy {
                return true;
            }
        }
        self.entity_type == "group" && relation == "member"
    }

    /// The transitive closure of relations that imply `required` under this
    /// model's `union` definitions. A relation implies itself.
    pub fn relations_implying(&self, required: &str) -> Vec<String> {
        let mut closure = vec![required.to_string()];
        let mut frontier = vec![required.to_string()];
        while let Some(target) = frontier.pop() {
            if let Some(def) = self.relations.get(&target) {
                for implied_by in &def.union {
                    if !closure.contains(implied_by) {
                        closure.push(implied_by.clone());
                        frontier.push(implied_by.clone());
                    }
                }
            }
        }
        closure
    }

    /// The fixed system-model fallback used by `getModel` when no tenant
    /// model is registered: `user`/`group`/`platform` bootstrap shape with
    /// `group:member` marked hierarchical.
    pub fn system_fallback(entity_type: &str) -> Self {
        let mut model = AuthorizationModel {
            entity_type: entity_type.to_string(),
            ..Default::default()
        };
        match entity_type {
            "group" => {
                model.relations.insert(
                    "member".to_string(),
                    RelationDef {
                        union: vec![],
                        hierarchy: true,
                    },
                );
            }
            "platform" => {
                model.relations.insert(
                    "admin".to_string(),
                    RelationDef {
                        union: vec![],
                        hierarchy: false,
                    },
                );
            }
            _ => {
                model.relations.insert(
                    "owner".to_string(),
                    RelationDef {
                        union: vec![],
                        hierarchy: false,
                    },
                );
                model.relations.insert(
                    "viewer".to_string(),
                    RelationDef {
                        union: vec!["owner".to_string()],
                        hierarchy: false,
                    },
                );
                model.permissions.insert(
                    "read".to_string(),
                    PermissionDef {
                        relation: "viewer".to_string(),
                        policy_engine: None,
                        policy: None,
                    },
                );
            }
        }
        model
    }
}

/// An audit-logged evaluation of an ABAC policy, structured so callers can
/// inspect evaluation history programmatically (SPEC_FULL §11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAudit {
    pub source: PolicySource,
    pub script: String,
    pub context: Value,
    pub result: bool,
    pub duration_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Tuple,
    Permission,
}
