//! Prometheus metrics for the entity cache.

use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::entry::EntityKind;
use crate::cache::region::RegionStats;

const NAMESPACE: &str = "entity_cache";

/// Counters and gauges registered into one registry.
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    registry: Registry,
    hits: IntCounterVec,
    misses: IntCounterVec,
    evictions: IntCounterVec,
    admission_rejections: IntCounterVec,
    load_failures: IntCounterVec,
    bytes: IntGaugeVec,
    entries: IntGaugeVec,
    max_budget: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), &["region"])?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["region"])?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl CacheMetrics {
    /// Metrics in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let hits = counter(&registry, "hits_total", "Lookups that found an entry")?;
        let misses = counter(&registry, "misses_total", "Lookups that found nothing")?;
        let evictions = counter(&registry, "evictions_total", "Entries evicted to make room")?;
        let admission_rejections = counter(
            &registry,
            "admission_rejections_total",
            "Insertions rejected because the budget could not fit them",
        )?;
        let load_failures = counter(&registry, "load_failures_total", "Loads that settled with an error")?;
        let bytes = gauge(&registry, "bytes", "Bytes accounted by resident entries")?;
        let entries = gauge(&registry, "entries", "Entries held, pending and resident")?;

        let max_budget = IntGauge::with_opts(
            Opts::new("max_budget_bytes", "Configured byte budget").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(max_budget.clone()))?;

        Ok(Self {
            registry,
            hits,
            misses,
            evictions,
            admission_rejections,
            load_failures,
            bytes,
            entries,
            max_budget,
        })
    }

    /// Render in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    pub(crate) fn record_lookup(&self, kind: EntityKind, hit: bool) {
        let vec = if hit { &self.hits } else { &self.misses };
        vec.with_label_values(&[label(kind)]).inc();
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions
            .with_label_values(&[label(EntityKind::Image)])
            .inc_by(count as u64);
    }

    pub(crate) fn record_rejection(&self, kind: EntityKind) {
        self.admission_rejections.with_label_values(&[label(kind)]).inc();
    }

    pub(crate) fn record_load_failure(&self, kind: EntityKind) {
        self.load_failures.with_label_values(&[label(kind)]).inc();
    }

    pub(crate) fn observe_region(&self, kind: EntityKind, stats: RegionStats) {
        self.bytes.with_label_values(&[label(kind)]).set(clamp(stats.bytes_used));
        self.entries
            .with_label_values(&[label(kind)])
            .set(clamp(stats.entries as u64));
    }

    pub(crate) fn set_max_budget(&self, bytes: u64) {
        self.max_budget.set(clamp(bytes));
    }
}

fn label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Image => "image",
        EntityKind::Volume => "volume",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_series() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.record_lookup(EntityKind::Image, true);
        metrics.record_lookup(EntityKind::Image, false);
        metrics.record_evictions(2);
        metrics.set_max_budget(100);
        metrics.observe_region(
            EntityKind::Volume,
            RegionStats {
                entries: 1,
                pending: 0,
                bytes_used: 90,
            },
        );

        let text = metrics.encode().unwrap();
        assert!(text.contains("entity_cache_hits_total{region=\"image\"} 1"));
        assert!(text.contains("entity_cache_evictions_total{region=\"image\"} 2"));
        assert!(text.contains("entity_cache_bytes{region=\"volume\"} 90"));
        assert!(text.contains("entity_cache_max_budget_bytes 100"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        CacheMetrics::with_registry(registry.clone()).unwrap();
        assert!(CacheMetrics::with_registry(registry).is_err());
    }
}
