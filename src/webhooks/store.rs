//! Storage interfaces for the webhook fabric's three record kinds. The
//! in-memory implementations are the default; a durable deployment backs
//! these with tables keyed the same way the tuple store's composite index is.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::types::{Delivery, Endpoint, Event, Subscription};
use crate::error::CoreError;

#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Endpoint>, CoreError>;
    async fn find_active_subscribed(
        &self,
        user_id: &str,
        event_type: &str,
    ) -> Result<Vec<Endpoint>, CoreError>;
}

#[derive(Default)]
pub struct InMemoryEndpointStore {
    endpoints: RwLock<Vec<Endpoint>>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl InMemoryEndpointStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_endpoint(&self, endpoint: Endpoint) {
        self.endpoints.write().push(endpoint);
    }

    pub fn subscribe(&self, endpoint_id: impl Into<String>, event_type: impl Into<String>) {
        let sub = Subscription {
            endpoint_id: endpoint_id.into(),
            event_type: event_type.into(),
        };
        let mut subs = self.subscriptions.write();
        if !subs.contains(&sub) {
            subs.push(sub);
        }
    }
}

#[async_trait]
impl EndpointStore for InMemoryEndpointStore {
    async fn find(&self, id: &str) -> Result<Option<Endpoint>, CoreError> {
        Ok(self.endpoints.read().iter().find(|e| e.id == id).cloned())
    }

    async fn find_active_subscribed(
        &self,
        user_id: &str,
        event_type: &str,
    ) -> Result<Vec<Endpoint>, CoreError> {
        let subscribed_ids: Vec<String> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.event_type == event_type)
            .map(|s| s.endpoint_id.clone())
            .collect();

        Ok(self
            .endpoints
            .read()
            .iter()
            .filter(|e| e.active && e.user_id == user_id && subscribed_ids.contains(&e.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, event: Event) -> Result<(), CoreError>;
    async fn find(&self, id: &str) -> Result<Option<Event>, CoreError>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, event: Event) -> Result<(), CoreError> {
        self.events.write().push(event);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Event>, CoreError> {
        Ok(self.events.read().iter().find(|e| e.id == id).cloned())
    }
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert(&self, delivery: Delivery) -> Result<(), CoreError>;
    async fn update(&self, delivery: Delivery) -> Result<(), CoreError>;
    async fn find(&self, id: &str) -> Result<Option<Delivery>, CoreError>;
    async fn all(&self) -> Result<Vec<Delivery>, CoreError>;
}

#[derive(Default)]
pub struct InMemoryDeliveryStore {
    deliveries: RwLock<Vec<Delivery>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn insert(&self, delivery: Delivery) -> Result<(), CoreError> {
        self.deliveries.write().push(delivery);
        Ok(())
    }

    async fn update(&self, delivery: Delivery) -> Result<(), CoreError> {
        let mut deliveries = self.deliveries.write();
        if let Some(existing) = deliveries.iter_mut().find(|d| d.id == delivery.id) {
            *existing = delivery;
        } else {
            deliveries.push(delivery);
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Delivery>, CoreError> {
        Ok(self.deliveries.read().iter().find(|d| d.id == id).cloned())
    }

    async fn all(&self) -> Result<Vec<Delivery>, CoreError> {
        Ok(self.deliveries.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::types::{DeliveryFormat, HttpMethod, RetryPolicy};

    #[tokio::test]
    async fn finds_only_active_subscribed_endpoints() {
        let store = InMemoryEndpointStore::new();
        store.add_endpoint(Endpoint {
            id: "ep1".into(),
            user_id: "u1".into(),
            url: "https://example.com/hook".into(),
            encrypted_secret: "enc".into(),
            active: true,
            retry_policy: RetryPolicy::None,
            delivery_format: DeliveryFormat::Json,
            method: HttpMethod::Post,
        });
        store.add_endpoint(Endpoint {
            id: "ep2".into(),
            user_id: "u1".into(),
            url: "https://example.com/hook2".into(),
            encrypted_secret: "enc".into(),
            active: false,
            retry_policy: RetryPolicy::None,
            delivery_format: DeliveryFormat::Json,
            method: HttpMethod::Post,
        });
        store.subscribe("ep1", "user.created");
        store.subscribe("ep2", "user.created");

        let found = store.find_active_subscribed("u1", "user.created").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "ep1");
    }
}
