//! The Authorization Engine (§4.4): a single public operation,
//! [`AuthorizationEngine::check_permission`], combining Zanzibar-style
//! relation checks with sandboxed ABAC policy evaluation.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::instrument;

use super::model::{PolicyAudit, PolicySource};
use super::tuple_store::TupleStore;
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::sandbox::{Helpers, SandboxPool, compile};

/// Looks up whether a subject holds the platform `admin` role, per step 1's
/// admin bypass. A real deployment backs this with the user table; tests and
/// embeddings that don't need the bypass use [`NoAdmins`].
pub trait UserDirectory: Send + Sync {
    fn is_platform_admin(&self, user_id: &str) -> bool;
}

/// Default directory: nobody is a platform admin.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAdmins;

impl UserDirectory for NoAdmins {
    fn is_platform_admin(&self, _user_id: &str) -> bool {
        false
    }
}

/// Sink for [`PolicyAudit`] records (SPEC_FULL §11). Defaults to discarding
/// them; [`InMemoryAuditLog`] is provided for tests and local inspection.
pub trait AuditSink: Send + Sync {
    fn record(&self, audit: PolicyAudit);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _audit: PolicyAudit) {}
}

/// In-memory audit log: every ABAC evaluation, in order, for inspection.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<parking_lot::Mutex<Vec<PolicyAudit>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<PolicyAudit> {
        self.entries.lock().clone()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, audit: PolicyAudit) {
        self.entries.lock().push(audit);
    }
}

/// Permissions resolved for a user, split by whether they still need a
/// runtime `check_permission` call with actual resource context (§4.4,
/// "Permission resolution for JWTs").
#[derive(Debug, Default, Clone)]
pub struct ResolvedPermissions {
    /// Every permission name the user holds, keyed by `entityType` (wildcard
    /// grants) or `entityType:entityId`.
    pub permissions: FxHashMap<String, Vec<String>>,
    /// The subset of `permissions` that require runtime re-evaluation because
    /// the granting tuple carried a `condition` or the permission carries a
    /// `policy`.
    pub abac_required: FxHashMap<String, Vec<String>>,
}

/// The ReBAC + ABAC authorization engine.
pub struct AuthorizationEngine {
    store: Arc<dyn TupleStore>,
    sandbox: SandboxPool,
    helpers: Arc<dyn Helpers>,
    config: AppConfig,
    metrics: Metrics,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
}

impl AuthorizationEngine {
    /// Builds an engine with default sandbox pool sizing, a no-op admin
    /// directory, null metrics, and a discarding audit sink — enough to run
    /// `check_permission` against pure ReBAC models out of the box.
    pub fn new(store: Arc<dyn TupleStore>) -> Self {
        Self {
            store,
            sandbox: SandboxPool::new(crate::sandbox::PoolConfig::default()),
            helpers: Arc::new(crate::sandbox::DefaultHelpers),
            config: AppConfig::default(),
            metrics: Metrics::null(),
            users: Arc::new(NoAdmins),
            audit: Arc::new(NullAuditSink),
        }
    }

    #[must_use]
    pub fn with_users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = users;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// `checkPermission(subjectType, subjectId, entityType, entityId, permission, context) -> bool`.
    ///
    /// Never propagates an internal error to the caller: any failure denies
    /// and increments the error counter (§4.4 failure semantics).
    #[instrument(skip(self, context), fields(subject = %format!("{subject_type}:{subject_id}"), entity = %format!("{entity_type}:{entity_id}"), permission))]
    pub async fn check_permission(
        &self,
        subject_type: &str,
        subject_id: &str,
        entity_type: &str,
        entity_id: &str,
        permission: &str,
        context: Value,
    ) -> bool {
        match self
            .check_permission_inner(subject_type, subject_id, entity_type, entity_id, permission, context)
            .await
        {
            Ok(allowed) => {
                self.metrics.count(
                    "authz.check.count",
                    &[("outcome", if allowed { "allow" } else { "deny" })],
                );
                allowed
            }
            Err(()) => {
                self.metrics.count("authz.check.count", &[("outcome", "error")]);
                false
            }
        }
    }

    async fn check_permission_inner(
        &self,
        subject_type: &str,
        subject_id: &str,
        entity_type: &str,
        entity_id: &str,
        permission: &str,
        context: Value,
    ) -> Result<bool, ()> {
        // Step 1: admin bypass.
        if subject_type == "user" && self.users.is_platform_admin(subject_id) {
            return Ok(true);
        }

        // Step 2/3: model + permission lookup. `get_model` always resolves to
        // at least the system fallback, so "no model" collapses into "no
        // permission defined" when the fallback doesn't name it either.
        let model = self.store.get_model(entity_type).await.map_err(|_| ())?;
        let Some(permission_def) = model.permissions.get(permission) else {
            return Ok(false);
        };

        // Step 4: subject expansion to a fixed point, guarding cycles with a
        // visited set.
        let subjects = self
            .expand_subjects(subject_type, subject_id)
            .await
            .map_err(|_| ())?;

        // Step 5: relations implying the permission's required relation.
        let required_relations = model.relations_implying(&permission_def.relation);

        // Step 6: tuple lookup across every (subject, relation) pair.
        for (s_type, s_id) in &subjects {
            for relation in &required_relations {
                let found = self
                    .store
                    .find_exact(entity_type, entity_id, relation, s_type, s_id)
                    .await
                    .map_err(|_| ())?;
                if let Some(tuple) = found {
                    // Step 7: policy evaluation priority — tuple condition
                    // first, then permission policy, else allow.
                    if let Some(condition) = &tuple.condition {
                        return self
                            .evaluate_policy(PolicySource::Tuple, condition, &context)
                            .await;
                    }
                    if let (Some(engine), Some(policy)) =
                        (&permission_def.policy_engine, &permission_def.policy)
                    {
                        if engine == "script" {
                            return self
                                .evaluate_policy(PolicySource::Permission, policy, &context)
                                .await;
                        }
                    }
                    return Ok(true);
                }
            }
        }

        // Step 8: no hit across any (subject, relation) pair.
        Ok(false)
    }

    /// BFS subject expansion (§4.4 step 4): the set of `(type, id)` the
    /// principal "is", following relations marked `hierarchy: true` (with the
    /// `group:member` legacy fallback) to a fixed point. Bounded by an
    /// explicit visited set so pathological/cyclic membership graphs
    /// terminate (§8 boundary behavior).
    async fn expand_subjects(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<(String, String)>, crate::authz::tuple_store::StoreError> {
        let root = (subject_type.to_string(), subject_id.to_string());
        let mut visited: HashSet<(String, String)> = HashSet::new();
        visited.insert(root.clone());
        let mut frontier = VecDeque::from([root]);
        let mut depth = 0usize;
        let mut fanout = 0usize;

        while let Some((cur_type, cur_id)) = frontier.pop_front() {
            let memberships = self.store.find_by_subject(&cur_type, &cur_id).await?;
            fanout += memberships.len();
            for tuple in memberships {
                let model = self.store.get_model(&tuple.entity_type).await?;
                if !model.is_hierarchical(&tuple.relation) {
                    continue;
                }
                let next = (tuple.entity_type.clone(), tuple.entity_id.clone());
                if visited.insert(next.clone()) {
                    frontier.push_back(next);
                }
            }
            depth += 1;
        }

        self.metrics
            .gauge("authz.subject_expansion.depth", depth as f64, &[]);
        self.metrics
            .gauge("authz.subject_expansion.fanout", fanout as f64, &[]);
        Ok(visited.into_iter().collect())
    }

    async fn evaluate_policy(
        &self,
        source: PolicySource,
        script_text: &str,
        context: &Value,
    ) -> Result<bool, ()> {
        let started = Instant::now();
        let compiled = compile(script_text, self.config.max_script_size_bytes);
        let (result, error) = match compiled {
            Ok(script) => {
                let report = crate::sandbox::execute(
                    &script,
                    context.clone(),
                    &self.sandbox,
                    Arc::clone(&self.helpers),
                    &self.config,
                )
                .await;
                match report.result {
                    Some(value) => (value == Value::Bool(true), None),
                    None => {
                        let diag = report.diagnostic.map(|d| d.to_string());
                        if matches!(
                            diag.as_deref(),
                            Some(d) if d.contains("timed out")
                        ) {
                            self.metrics.count("authz.policy_timeout.count", &[]);
                        }
                        (false, diag)
                    }
                }
            }
            Err(err) => (false, Some(err.to_string())),
        };

        self.audit.record(PolicyAudit {
            source,
            script: script_text.to_string(),
            context: context.clone(),
            result,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            error,
        });

        Ok(result)
    }

    /// `resolveAllPermissionsWithABACInfo(userId)`: every permission the user
    /// holds under any matching relation, split into the subset requiring
    /// runtime re-evaluation (§4.4).
    pub async fn resolve_all_permissions_with_abac_info(
        &self,
        user_id: &str,
    ) -> Result<ResolvedPermissions, ()> {
        let subjects = self
            .expand_subjects("user", user_id)
            .await
            .map_err(|_| ())?;
        let subject_refs: Vec<(&str, &str)> = subjects
            .iter()
            .map(|(t, i)| (t.as_str(), i.as_str()))
            .collect();
        let tuples = self
            .store
            .find_by_subjects(&subject_refs)
            .await
            .map_err(|_| ())?;

        let mut resolved = ResolvedPermissions::default();
        let mut model_cache: FxHashMap<String, super::model::AuthorizationModel> =
            FxHashMap::default();

        for tuple in tuples {
            let model = match model_cache.get(&tuple.entity_type) {
                Some(m) => m.clone(),
                None => {
                    let m = self
                        .store
                        .get_model(&tuple.entity_type)
                        .await
                        .map_err(|_| ())?;
                    model_cache.insert(tuple.entity_type.clone(), m.clone());
                    m
                }
            };

            let key = if tuple.is_wildcard() {
                tuple.entity_type.clone()
            } else {
                format!("{}:{}", tuple.entity_type, tuple.entity_id)
            };

            for (name, def) in &model.permissions {
                let implies = model.relations_implying(&def.relation);
                if !implies.contains(&tuple.relation) {
                    continue;
                }
                let perms = resolved.permissions.entry(key.clone()).or_default();
                if !perms.contains(name) {
                    perms.push(name.clone());
                }
                let needs_abac = tuple.condition.is_some() || def.policy.is_some();
                if needs_abac {
                    let abac = resolved.abac_required.entry(key.clone()).or_default();
                    if !abac.contains(name) {
                        abac.push(name.clone());
                    }
                }
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::model::{AuthorizationModel, PermissionDef, RelationDef, Tuple};
    use crate::storage::memory::InMemoryTupleStore;
    use serde_json::json;
    use std::sync::Arc;

    fn doc_model() -> AuthorizationModel {
        let mut model = AuthorizationModel {
            entity_type: "doc".to_string(),
            ..Default::default()
        };
        model.relations.insert(
            "owner".to_string(),
            RelationDef {
                union: vec![],
                hierarchy: false,
            },
        );
        model.relations.insert(
            "editor".to_string(),
            RelationDef {
                union: vec!["owner".to_string()],
                hierarchy: false,
            },
        );
        model.relations.insert(
            "viewer".to_string(),
            RelationDef {
                union: vec!["editor".to_string()],
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
        model
    }

    #[tokio::test]
    async fn transitive_allow_scenario() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.upsert_model(doc_model()).await.unwrap();
        store
            .upsert_tuple(Tuple::new("doc", "d1", "owner", "user", "u1"))
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(store);
        assert!(
            engine
                .check_permission("user", "u1", "doc", "d1", "read", json!({}))
                .await
        );
        assert!(
            !engine
                .check_permission("user", "u1", "doc", "d2", "read", json!({}))
                .await
        );
    }

    #[tokio::test]
    async fn group_hierarchy_scenario() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.upsert_model(doc_model()).await.unwrap();
        store
            .upsert_tuple(Tuple::new("group", "g1", "member", "user", "u1"))
            .await
            .unwrap();
        store
            .upsert_tuple(Tuple::new("doc", "d1", "viewer", "group", "g1"))
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(store.clone());
        assert!(
            engine
                .check_permission("user", "u1", "doc", "d1", "read", json!({}))
                .await
        );

        store
            .delete_tuple("group", "g1", "member", "user", "u1")
            .await
            .unwrap();
        assert!(
            !engine
                .check_permission("user", "u1", "doc", "d1", "read", json!({}))
                .await
        );
    }

    #[tokio::test]
    async fn abac_deny_scenario() {
        let store = Arc::new(InMemoryTupleStore::new());
        let mut model = AuthorizationModel {
            entity_type: "doc".to_string(),
            ..Default::default()
        };
        model.relations.insert(
            "admin".to_string(),
            RelationDef {
                union: vec![],
                hierarchy: false,
            },
        );
        model.permissions.insert(
            "refund".to_string(),
            PermissionDef {
                relation: "admin".to_string(),
                policy_engine: Some("script".to_string()),
                policy: Some("return context.resource.amount < 1000".to_string()),
            },
        );
        store.upsert_model(model).await.unwrap();
        store
            .upsert_tuple(Tuple::new("doc", "d1", "admin", "user", "u1"))
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(store);
        assert!(
            engine
                .check_permission(
                    "user",
                    "u1",
                    "doc",
                    "d1",
                    "refund",
                    json!({"resource": {"amount": 500}})
                )
                .await
        );
        assert!(
            !engine
                .check_permission(
                    "user",
                    "u1",
                    "doc",
                    "d1",
                    "refund",
                    json!({"resource": {"amount": 1500}})
                )
                .await
        );
    }

    #[tokio::test]
    async fn wildcard_grant_matches_any_entity() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.upsert_model(doc_model()).await.unwrap();
        store
            .upsert_tuple(Tuple::new("doc", "*", "viewer", "user", "u1"))
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(store);
        assert!(
            engine
                .check_permission("user", "u1", "doc", "anything", "read", json!({}))
                .await
        );
    }

    #[tokio::test]
    async fn admin_bypass_allows_regardless_of_tuples() {
        struct AllAdmins;
        impl UserDirectory for AllAdmins {
            fn is_platform_admin(&self, _user_id: &str) -> bool {
                true
            }
        }

        let store = Arc::new(InMemoryTupleStore::new());
        let engine = AuthorizationEngine::new(store).with_users(Arc::new(AllAdmins));
        assert!(
            engine
                .check_permission("user", "u1", "doc", "d1", "read", json!({}))
                .await
        );
    }

    #[tokio::test]
    async fn resolve_all_permissions_flags_abac_required() {
        let store = Arc::new(InMemoryTupleStore::new());
        let mut model = doc_model();
        model.permissions.insert(
            "export".to_string(),
            PermissionDef {
                relation: "owner".to_string(),
                policy_engine: Some("script".to_string()),
                policy: Some("return context.allowed".to_string()),
            },
        );
        store.upsert_model(model).await.unwrap();
        store
            .upsert_tuple(Tuple::new("doc", "d1", "owner", "user", "u1"))
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(store);
        let resolved = engine
            .resolve_all_permissions_with_abac_info("u1")
            .await
            .unwrap();

        let perms = resolved.permissions.get("doc:d1").unwrap();
        assert!(perms.contains(&"read".to_string()));
        assert!(perms.contains(&"export".to_string()));
        let abac = resolved.abac_required.get("doc:d1").unwrap();
        assert!(abac.contains(&"export".to_string()));
        assert!(!abac.contains(&"read".to_string()));
    }
}
