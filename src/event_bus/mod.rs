//! Event bus for pipeline trace/span telemetry and diagnostics.
//!
//! Organized around a broadcast-based [`EventHub`] and pluggable sinks
//! ([`EventBus`]); any engine holding an [`EventEmitter`] can fire [`Event`]s
//! without depending on which sinks are actually wired up.

pub mod bus;
pub mod diagnostics;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod sink;

pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter};
pub use event::{Event, TraceEvent};
pub use hub::{BlockingEventIter, EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};
