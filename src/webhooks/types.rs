//! Webhook Fabric data model (§3): endpoints, subscriptions, the immutable
//! event log, and per-endpoint deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// No retries: a single delivery attempt, success or not.
    None,
    /// A bounded number of retries with the queue's own backoff.
    Bounded { max_attempts: u32 },
}

impl RetryPolicy {
    pub fn max_attempts(self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Bounded { max_attempts } => max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFormat {
    Json,
    Form,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub encrypted_secret: String,
    pub active: bool,
    pub retry_policy: RetryPolicy,
    pub delivery_format: DeliveryFormat,
    pub method: HttpMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub endpoint_id: String,
    pub event_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Retrying,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub event_id: String,
    pub endpoint_id: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub duration_ms: Option<f64>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn pending(id: String, event_id: String, endpoint_id: String) -> Self {
        Self {
            id,
            event_id,
            endpoint_id,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            response_code: None,
            response_body: None,
            duration_ms: None,
            last_attempt_at: None,
        }
    }
}

/// Classifies an HTTP response status for retry purposes (§7): 4xx other
/// than 408/429 is permanent (the request itself is wrong and redelivery
/// won't fix it); 5xx/408/429 are transient and worth retrying.
pub fn is_transient_status(status_code: u16) -> bool {
    match status_code {
        408 | 429 => true,
        400..=499 => false,
        _ => true,
    }
}

/// Truncates a response body to the configured cap, the same shape §4.6
/// "Record Delivery" requires (≤1 KiB by default).
pub fn truncate_body(body: &str, cap_bytes: usize) -> String {
    if body.len() <= cap_bytes {
        body.to_string()
    } else {
        let mut end = cap_bytes.min(body.len());
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_bodies_untouched() {
        assert_eq!(truncate_body("short", 1024), "short");
    }

    #[test]
    fn truncate_caps_long_bodies_on_a_char_boundary() {
        let body = "a".repeat(2000);
        let truncated = truncate_body(&body, 1024);
        assert_eq!(truncated.len(), 1024);
    }

    #[test]
    fn status_classification_matches_transient_permanent_split() {
        assert!(is_transient_status(500));
        assert!(is_transient_status(503));
        assert!(is_transient_status(408));
        assert!(is_transient_status(429));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(422));
    }
}
