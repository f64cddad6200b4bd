//! The Webhook Fabric (§4.6): emission, queue-consumer delivery, and
//! idempotent, signed HTTP fan-out to subscribed endpoints.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::instrument;

use super::idempotency::ProcessedSet;
use super::queue::{OutboundQueue, QueueVerifier, WebhookJob, sign};
use super::store::{DeliveryStore, EndpointStore, EventStore};
use super::types::{Delivery, DeliveryFormat, DeliveryStatus, Endpoint, Event, HttpMethod};
use crate::config::AppConfig;
use crate::error::CoreError;
use crate::ids::IdGenerator;
use crate::metrics::Metrics;
use crate::secrets::SecretsVault;

#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    Delivered(Delivery),
    Duplicate,
}

pub struct WebhookFabric {
    events: Arc<dyn EventStore>,
    endpoints: Arc<dyn EndpointStore>,
    deliveries: Arc<dyn DeliveryStore>,
    queue: Arc<dyn OutboundQueue>,
    vault: Arc<SecretsVault>,
    http: reqwest::Client,
    ids: IdGenerator,
    metrics: Metrics,
    processed: ProcessedSet,
    config: AppConfig,
}

impl WebhookFabric {
    pub fn new(
        events: Arc<dyn EventStore>,
        endpoints: Arc<dyn EndpointStore>,
        deliveries: Arc<dyn DeliveryStore>,
        queue: Arc<dyn OutboundQueue>,
        vault: Arc<SecretsVault>,
    ) -> Self {
        Self {
            events,
            endpoints,
            deliveries,
            queue,
            vault,
            http: reqwest::Client::new(),
            ids: IdGenerator::new(),
            metrics: Metrics::null(),
            processed: ProcessedSet::new(),
            config: AppConfig::default(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// `emit(userId, eventType, data)` (§4.6 "Emission"): persists the Event,
    /// fans out a pending Delivery and a queue job per subscribed active
    /// endpoint.
    #[instrument(skip(self, data))]
    pub async fn emit(&self, user_id: &str, event_type: &str, data: Value) -> Result<Event, CoreError> {
        let event = Event {
            id: self.ids.generate_event_id(),
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
            payload: data,
            created_at: Utc::now(),
        };
        self.events.insert(event.clone()).await?;

        let endpoints = self
            .endpoints
            .find_active_subscribed(user_id, event_type)
            .await?;

        for endpoint in &endpoints {
            let delivery = Delivery::pending(
                self.ids.generate_delivery_id(),
                event.id.clone(),
                endpoint.id.clone(),
            );
            self.deliveries.insert(delivery).await?;
            self.queue
                .enqueue(WebhookJob {
                    event_id: event.id.clone(),
                    endpoint_id: endpoint.id.clone(),
                })
                .await?;
        }

        self.metrics.count(
            "webhooks.emit.count",
            &[("endpoint_count", &endpoints.len().to_string())],
        );

        Ok(event)
    }

    /// Processes one job received from the queue, verifying the provider's
    /// own signature, enforcing idempotency, and delivering to the endpoint.
    #[instrument(skip(self, raw_body, verifier))]
    pub async fn consume(
        &self,
        raw_body: &[u8],
        signature_hex: &str,
        verifier: &QueueVerifier,
    ) -> Result<ConsumeOutcome, CoreError> {
        if !verifier.verify(raw_body, signature_hex) {
            self.metrics
                .count("webhooks.consume.count", &[("outcome", "invalid_signature")]);
            return Err(CoreError::SignatureInvalid);
        }

        let job: WebhookJob = serde_json::from_slice(raw_body).map_err(|e| CoreError::InvalidRequest {
            message: format!("malformed webhook job: {e}"),
        })?;

        if !self
            .processed
            .mark_if_absent(&job.idempotency_key(), self.config.webhook_idempotency_ttl)
        {
            self.metrics
                .count("webhooks.consume.count", &[("outcome", "duplicate")]);
            return Ok(ConsumeOutcome::Duplicate);
        }

        let event = self
            .events
            .find(&job.event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                what: format!("event {}", job.event_id),
            })?;
        let endpoint = self
            .endpoints
            .find(&job.endpoint_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                what: format!("endpoint {}", job.endpoint_id),
            })?;

        let delivery = self.deliver(&event, &endpoint).await?;
        self.deliveries.update(delivery.clone()).await?;

        self.metrics.count(
            "webhooks.consume.count",
            &[("outcome", delivery_outcome_label(delivery.status))],
        );

        Ok(ConsumeOutcome::Delivered(delivery))
    }

    async fn deliver(&self, event: &Event, endpoint: &Endpoint) -> Result<Delivery, CoreError> {
        let mut delivery = self
            .deliveries
            .all()
            .await?
            .into_iter()
            .find(|d| d.event_id == event.id && d.endpoint_id == endpoint.id)
            .unwrap_or_else(|| {
                Delivery::pending(self.ids.generate_delivery_id(), event.id.clone(), endpoint.id.clone())
            });

        let secret = self
            .vault
            .decrypt_with_platform_secret(&endpoint.encrypted_secret)
            .ok_or_else(|| CoreError::InternalError {
                message: "failed to decrypt endpoint secret".to_string(),
            })?;

        let now = Utc::now();
        let payload = json!({
            "id": event.id,
            "origin": self.config.jwt_issuer,
            "type": event.event_type,
            "timestamp": now.to_rfc3339(),
            "data": event.payload,
        });
        let body = serde_json::to_vec(&payload).map_err(|e| CoreError::InternalError {
            message: format!("failed to serialize delivery payload: {e}"),
        })?;
        let signature = sign(secret.as_bytes(), &body);

        let started = Instant::now();
        let content_type = match endpoint.delivery_format {
            DeliveryFormat::Json => "application/json",
            DeliveryFormat::Form => "application/x-www-form-urlencoded",
        };

        let request = match endpoint.method {
            HttpMethod::Post => self.http.post(&endpoint.url),
            HttpMethod::Put => self.http.put(&endpoint.url),
        }
        .header("X-Webhook-Signature", signature)
        .header("X-Webhook-Id", event.id.clone())
        .header("X-Webhook-Timestamp", now.timestamp().to_string())
        .header("X-Webhook-Origin", self.config.jwt_issuer.clone())
        .header("Content-Type", content_type)
        .body(body);

        delivery.attempt_count += 1;
        delivery.last_attempt_at = Some(now);

        match request.send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let response_text = response.text().await.unwrap_or_default();
                delivery.response_code = Some(status_code);
                delivery.response_body = Some(super::types::truncate_body(
                    &response_text,
                    self.config.webhook_response_body_cap_bytes,
                ));
                delivery.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
                delivery.status = if (200..300).contains(&status_code) {
                    DeliveryStatus::Success
                } else if !super::types::is_transient_status(status_code) {
                    // Permanent 4xx: redelivery can't fix a malformed/rejected
                    // request, so this delivery is dead on the first attempt.
                    DeliveryStatus::Dead
                } else if delivery.attempt_count >= endpoint.retry_policy.max_attempts() {
                    DeliveryStatus::Dead
                } else {
                    DeliveryStatus::Failed
                };
            }
            Err(err) => {
                // Network-level failures are always transient (§7).
                delivery.response_code = None;
                delivery.response_body = Some(super::types::truncate_body(
                    &err.to_string(),
                    self.config.webhook_response_body_cap_bytes,
                ));
                delivery.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
                delivery.status = if delivery.attempt_count >= endpoint.retry_policy.max_attempts() {
                    DeliveryStatus::Dead
                } else {
                    DeliveryStatus::Failed
                };
            }
        }

        Ok(delivery)
    }
}

fn delivery_outcome_label(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Success => "success",
        DeliveryStatus::Failed => "failed",
        DeliveryStatus::Retrying => "retrying",
        DeliveryStatus::Dead => "dead",
    }
}
