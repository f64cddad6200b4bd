//! Fire-and-forget metrics recording.
//!
//! Every core operation emits counters (`*.count` with outcome tags),
//! histograms (`*.duration_ms`), and gauges (`*.active_key.age_ms`, pool
//! occupancy, subject-expansion traversal depth). Emission never fails the
//! caller: a [`MetricsSink`] implementation that can't record a point just
//! drops it.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// A recorded metric point, tagged by name and an optional set of label pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricPoint {
    Counter {
        name: String,
        value: u64,
        tags: Vec<(String, String)>,
    },
    Histogram {
        name: String,
        value_ms: f64,
        tags: Vec<(String, String)>,
    },
    Gauge {
        name: String,
        value: f64,
        tags: Vec<(String, String)>,
    },
}

/// Sink for recorded metric points. Implementations must not block callers
/// meaningfully and must never propagate an error back into core logic.
pub trait MetricsSink: Send + Sync {
    fn record(&self, point: MetricPoint);
}

/// No-op sink, the default when no metrics backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn record(&self, _point: MetricPoint) {}
}

/// In-memory sink for tests and local inspection: aggregates counters,
/// records histogram samples, and keeps the latest gauge value per name.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetricsSink {
    inner: Arc<Mutex<InMemoryMetricsInner>>,
}

#[derive(Debug, Default)]
struct InMemoryMetricsInner {
    counters: FxHashMap<String, u64>,
    histograms: FxHashMap<String, Vec<f64>>,
    gauges: FxHashMap<String, f64>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn histogram_samples(&self, name: &str) -> Vec<f64> {
        self.inner
            .lock()
            .histograms
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.inner.lock().gauges.get(name).copied()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, point: MetricPoint) {
        let mut inner = self.inner.lock();
        match point {
            MetricPoint::Counter { name, value, .. } => {
                *inner.counters.entry(name).or_insert(0) += value;
            }
            MetricPoint::Histogram { name, value_ms, .. } => {
                inner.histograms.entry(name).or_default().push(value_ms);
            }
            MetricPoint::Gauge { name, value, .. } => {
                inner.gauges.insert(name, value);
            }
        }
    }
}

/// Convenience recorder wrapping an `Arc<dyn MetricsSink>` with typed helpers
/// mirroring the three primitives named by the component design.
#[derive(Clone)]
pub struct Metrics {
    sink: Arc<dyn MetricsSink>,
}

impl Metrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn null() -> Self {
        Self::new(Arc::new(NullMetricsSink))
    }

    pub fn count(&self, name: &str, tags: &[(&str, &str)]) {
        self.sink.record(MetricPoint::Counter {
            name: name.to_string(),
            value: 1,
            tags: owned_tags(tags),
        });
    }

    pub fn duration_ms(&self, name: &str, value_ms: f64, tags: &[(&str, &str)]) {
        self.sink.record(MetricPoint::Histogram {
            name: name.to_string(),
            value_ms,
            tags: owned_tags(tags),
        });
    }

    pub fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.sink.record(MetricPoint::Gauge {
            name: name.to_string(),
            value,
            tags: owned_tags(tags),
        });
    }
}

fn owned_tags(tags: &[(&str, &str)]) -> Vec<(String, String)> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_aggregates_counters() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let metrics = Metrics::new(sink.clone());
        metrics.count("authz.check.count", &[("outcome", "allow")]);
        metrics.count("authz.check.count", &[("outcome", "allow")]);
        assert_eq!(sink.counter("authz.check.count"), 2);
    }

    #[test]
    fn in_memory_sink_records_histogram_samples() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let metrics = Metrics::new(sink.clone());
        metrics.duration_ms("pipeline.dispatch.duration_ms", 12.5, &[]);
        assert_eq!(sink.histogram_samples("pipeline.dispatch.duration_ms"), vec![12.5]);
    }

    #[test]
    fn null_sink_never_panics() {
        let metrics = Metrics::null();
        metrics.count("noop", &[]);
        metrics.gauge("noop.gauge", 1.0, &[]);
    }
}
