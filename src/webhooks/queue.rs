//! The external job queue boundary: `emit` enqueues `(eventId, endpointId)`
//! jobs, and the queue consumer verifies the provider's own signature before
//! trusting a job (§4.6).

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookJob {
    pub event_id: String,
    pub endpoint_id: String,
}

impl WebhookJob {
    /// The identity idempotency keys on: one event fans out to one job per
    /// subscribed endpoint, so dedup must be per `(event_id, endpoint_id)`,
    /// not per event alone (§8: "at most one Delivery per endpoint").
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.event_id, self.endpoint_id)
    }
}

/// Enqueues delivery jobs onto the external queue. A real deployment backs
/// this with the provider's SDK; [`InMemoryQueue`] is enough for tests and
/// for driving the consumer loop in-process.
#[async_trait]
pub trait OutboundQueue: Send + Sync {
    async fn enqueue(&self, job: WebhookJob) -> Result<(), crate::error::CoreError>;
}

#[derive(Default)]
pub struct InMemoryQueue {
    jobs: Mutex<Vec<WebhookJob>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<WebhookJob> {
        std::mem::take(&mut self.jobs.lock())
    }
}

#[async_trait]
impl OutboundQueue for InMemoryQueue {
    async fn enqueue(&self, job: WebhookJob) -> Result<(), crate::error::CoreError> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

/// Verifies a queue provider's signature over a job body against the
/// provider's current and next-accepted signing keys, so a key rotation on
/// the provider's side never breaks in-flight verification.
pub struct QueueVerifier {
    current_secret: Vec<u8>,
    next_secret: Option<Vec<u8>>,
}

impl QueueVerifier {
    pub fn new(current_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            current_secret: current_secret.into(),
            next_secret: None,
        }
    }

    #[must_use]
    pub fn with_next_secret(mut self, next_secret: impl Into<Vec<u8>>) -> Self {
        self.next_secret = Some(next_secret.into());
        self
    }

    pub fn verify(&self, body: &[u8], signature_hex: &str) -> bool {
        sign(&self.current_secret, body) == signature_hex.to_lowercase()
            || self
                .next_secret
                .as_ref()
                .map(|secret| sign(secret, body) == signature_hex.to_lowercase())
                .unwrap_or(false)
    }
}

pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
