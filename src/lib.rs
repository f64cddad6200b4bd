//! `authgraph` — the engineering core of an identity and authorization platform.
//!
//! The crate is organized around the three subsystems that interleave to make
//! this core hard: a sandboxed [`pipeline`] engine that runs user-authored
//! scripts at hook points in the authentication flow, an [`authz`] engine that
//! combines Zanzibar-style relation checks with sandboxed ABAC policies, and a
//! [`credentials`]/[`webhooks`] fabric that turns long-lived API keys into
//! short-lived JWTs and reliably fans events out to subscribers.
//!
//! Everything else — [`storage`], [`secrets`], [`metrics`], [`config`],
//! [`diagnostics`] and [`telemetry`] — is the ambient plumbing those three
//! lean on.
//!
//! # Example
//!
//! ```no_run
//! use authgraph::authz::AuthorizationEngine;
//! use authgraph::storage::memory::InMemoryTupleStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryTupleStore::new());
//! let engine = AuthorizationEngine::new(store);
//! let allowed = engine
//!     .check_permission("user", "u1", "doc", "d1", "read", serde_json::json!({}))
//!     .await;
//! println!("allowed: {allowed}");
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod event_bus;
pub mod ids;
pub mod metrics;
pub mod pipeline;
pub mod sandbox;
pub mod secrets;
pub mod storage;
pub mod telemetry;
pub mod webhooks;

pub use error::CoreError;
