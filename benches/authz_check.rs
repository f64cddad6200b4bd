//! Benchmarks `AuthorizationEngine::check_permission` against a small
//! hierarchical tuple graph, the latency-sensitive path §4.4 calls out.

use std::sync::Arc;

use authgraph::authz::AuthorizationEngine;
use authgraph::authz::{AuthorizationModel, Tuple, TupleStore};
use authgraph::storage::memory::InMemoryTupleStore;
use criterion::{Criterion, criterion_group, criterion_main};

async fn seeded_store() -> Arc<InMemoryTupleStore> {
    let store = Arc::new(InMemoryTupleStore::new());
    store
        .upsert_model(AuthorizationModel::system_fallback("doc"))
        .await
        .unwrap();

    // A small group hierarchy: user -> group member -> group owner -> doc viewer.
    store
        .upsert_tuple(Tuple::new("group", "eng", "member", "user", "u1"))
        .await
        .unwrap();
    store
        .upsert_tuple(Tuple::new(
            "doc",
            "d1",
            "viewer",
            "group",
            "eng",
        ))
        .await
        .unwrap();
    store
}

fn bench_check_permission(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(seeded_store());
    let engine = AuthorizationEngine::new(store);

    c.bench_function("authz_check_permission_hierarchical", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .check_permission("user", "u1", "doc", "d1", "read", serde_json::json!({}))
                .await
        });
    });
}

criterion_group!(benches, bench_check_permission);
criterion_main!(benches);
