//! The Webhook Fabric (§4.6): event ingress, idempotent signed delivery to
//! subscribed endpoints, and retry/dead-letter classification.

pub mod fabric;
pub mod idempotency;
pub mod queue;
pub mod store;
pub mod types;

pub use fabric::{ConsumeOutcome, WebhookFabric};
pub use idempotency::ProcessedSet;
pub use queue::{InMemoryQueue, OutboundQueue, QueueVerifier, WebhookJob};
pub use store::{
    DeliveryStore, EndpointStore, EventStore, InMemoryDeliveryStore, InMemoryEndpointStore,
    InMemoryEventStore,
};
pub use types::{
    Delivery, DeliveryFormat, DeliveryStatus, Endpoint, Event, HttpMethod, RetryPolicy, Subscription,
};
