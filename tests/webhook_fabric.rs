//! End-to-end webhook fan-out: `emit` through the queue to `consume`, and the
//! retry-policy-driven Failed/Dead classification an HTTP failure produces.

use std::sync::Arc;

use authgraph::webhooks::{
    DeliveryFormat, DeliveryStatus, DeliveryStore, Endpoint, HttpMethod, InMemoryDeliveryStore,
    InMemoryEndpointStore, InMemoryEventStore, InMemoryQueue, QueueVerifier, RetryPolicy,
    WebhookFabric,
};
use authgraph::secrets::SecretsVault;
use httpmock::MockServer;
use serde_json::json;

fn vault() -> Arc<SecretsVault> {
    SecretsVault::new(b"platform-secret".to_vec())
}

/// `emit` writes a pending Delivery and a job onto the queue; a consumer
/// drains the queue, re-signs each job under its own queue secret, and hands
/// it to `consume`. This exercises that full loop end to end rather than
/// constructing the job by hand.
#[tokio::test]
async fn emit_then_drain_then_consume_delivers_successfully() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::POST).path("/hook");
        then.status(200).body("received");
    });

    let endpoints = InMemoryEndpointStore::new();
    endpoints.add_endpoint(Endpoint {
        id: "ep1".into(),
        user_id: "u1".into(),
        url: server.url("/hook"),
        encrypted_secret: vault().encrypt_with_platform_secret("endpoint-secret").unwrap(),
        active: true,
        retry_policy: RetryPolicy::None,
        delivery_format: DeliveryFormat::Json,
        method: HttpMethod::Post,
    });
    endpoints.subscribe("ep1", "invoice.paid");

    let deliveries = InMemoryDeliveryStore::new();
    let queue = Arc::new(InMemoryQueue::new());
    let fabric = WebhookFabric::new(
        InMemoryEventStore::new(),
        endpoints,
        deliveries.clone(),
        queue.clone(),
        vault(),
    );

    fabric
        .emit("u1", "invoice.paid", json!({"invoiceId": "inv_1"}))
        .await
        .unwrap();

    let jobs = queue.drain();
    assert_eq!(jobs.len(), 1);

    let queue_secret = b"queue-provider-secret".to_vec();
    let verifier = QueueVerifier::new(queue_secret.clone());
    for job in jobs {
        let body = serde_json::to_vec(&job).unwrap();
        let signature = authgraph::webhooks::queue::sign(&queue_secret, &body);
        fabric.consume(&body, &signature, &verifier).await.unwrap();
    }

    mock.assert();
    let all = deliveries.all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, DeliveryStatus::Success);
}

#[tokio::test]
async fn a_failing_endpoint_is_marked_dead_once_its_retry_budget_is_exhausted() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::POST).path("/hook");
        then.status(500).body("nope");
    });

    let endpoints = InMemoryEndpointStore::new();
    endpoints.add_endpoint(Endpoint {
        id: "ep_single_try".into(),
        user_id: "u1".into(),
        url: server.url("/hook"),
        encrypted_secret: vault().encrypt_with_platform_secret("s").unwrap(),
        active: true,
        retry_policy: RetryPolicy::Bounded { max_attempts: 1 },
        delivery_format: DeliveryFormat::Json,
        method: HttpMethod::Post,
    });
    endpoints.subscribe("ep_single_try", "invoice.paid");

    endpoints.add_endpoint(Endpoint {
        id: "ep_with_retries".into(),
        user_id: "u1".into(),
        url: server.url("/hook"),
        encrypted_secret: vault().encrypt_with_platform_secret("s").unwrap(),
        active: true,
        retry_policy: RetryPolicy::Bounded { max_attempts: 5 },
        delivery_format: DeliveryFormat::Json,
        method: HttpMethod::Post,
    });
    endpoints.subscribe("ep_with_retries", "invoice.paid");

    let deliveries = InMemoryDeliveryStore::new();
    let queue = Arc::new(InMemoryQueue::new());
    let fabric = WebhookFabric::new(
        InMemoryEventStore::new(),
        endpoints,
        deliveries.clone(),
        queue.clone(),
        vault(),
    );

    fabric
        .emit("u1", "invoice.paid", json!({"invoiceId": "inv_2"}))
        .await
        .unwrap();

    let queue_secret = b"queue-provider-secret".to_vec();
    let verifier = QueueVerifier::new(queue_secret.clone());
    for job in queue.drain() {
        let body = serde_json::to_vec(&job).unwrap();
        let signature = authgraph::webhooks::queue::sign(&queue_secret, &body);
        fabric.consume(&body, &signature, &verifier).await.unwrap();
    }

    let all = deliveries.all().await.unwrap();
    let single_try = all.iter().find(|d| d.endpoint_id == "ep_single_try").unwrap();
    let with_retries = all.iter().find(|d| d.endpoint_id == "ep_with_retries").unwrap();

    assert_eq!(single_try.status, DeliveryStatus::Dead);
    assert_eq!(with_retries.status, DeliveryStatus::Failed);
    assert_eq!(single_try.response_code, Some(500));
}
