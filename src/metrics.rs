//! # Prometheus Metrics — Exposition
//!
//! Operational metrics for the connection pool and the export/import
//! engines, exposed in the Prometheus text exposition format for scraping
//! by Prometheus, Grafana Agent, or any OpenMetrics-compatible collector.
//! The crate never starts an HTTP listener itself — callers mount
//! [`CoreMetrics::encode`] behind whatever `/metrics` route their own
//! server exposes.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `pool_leases_active` | Gauge | — | Leases currently checked out |
//! | `pool_leases_waited_total` | Counter | — | Lease requests that had to wait for a permit |
//! | `pool_throttle_events_total` | Counter | `component` | Throttle responses observed, by component |
//! | `export_rows_total` | Counter | `entity` | Rows emitted by the parallel exporter |
//! | `import_rows_total` | Counter | `entity` | Rows applied by the tiered importer |

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ComponentLabel {
    pub component: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EntityLabel {
    pub entity: String,
}

/// Thread-safe metrics registry. All fields use atomic types and are safe
/// to update from any task.
pub struct CoreMetrics {
    registry: Registry,
    pub pool_leases_active: Gauge,
    pub pool_leases_waited_total: Counter,
    pub pool_throttle_events_total: Family<ComponentLabel, Counter>,
    pub export_rows_total: Family<EntityLabel, Counter>,
    pub import_rows_total: Family<EntityLabel, Counter>,
}

impl CoreMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let pool_leases_active = Gauge::default();
        registry.register(
            "pool_leases_active",
            "Leases currently checked out of the connection pool",
            pool_leases_active.clone(),
        );

        let pool_leases_waited_total = Counter::default();
        registry.register(
            "pool_leases_waited_total",
            "Lease requests that had to wait for a free permit",
            pool_leases_waited_total.clone(),
        );

        let pool_throttle_events_total = Family::<ComponentLabel, Counter>::default();
        registry.register(
            "pool_throttle_events_total",
            "Throttle responses observed, by component",
            pool_throttle_events_total.clone(),
        );

        let export_rows_total = Family::<EntityLabel, Counter>::default();
        registry.register(
            "export_rows_total",
            "Rows emitted by the parallel exporter, by entity",
            export_rows_total.clone(),
        );

        let import_rows_total = Family::<EntityLabel, Counter>::default();
        registry.register(
            "import_rows_total",
            "Rows applied by the tiered importer, by entity",
            import_rows_total.clone(),
        );

        CoreMetrics {
            registry,
            pool_leases_active,
            pool_leases_waited_total,
            pool_throttle_events_total,
            export_rows_total,
            import_rows_total,
        }
    }

    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).expect("encoding metrics should not fail");
        buf
    }
}

impl Default for CoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_contains_registered_metrics() {
        let m = CoreMetrics::new();
        m.pool_leases_active.set(3);
        m.pool_throttle_events_total
            .get_or_create(&ComponentLabel {
                component: "export".to_string(),
            })
            .inc();
        m.export_rows_total
            .get_or_create(&EntityLabel {
                entity: "account".to_string(),
            })
            .inc_by(42);

        let output = m.encode();
        assert!(output.contains("pool_leases_active"));
        assert!(output.contains("pool_throttle_events_total"));
        assert!(output.contains("export_rows_total"));
        assert!(output.contains("account"));
    }

    #[test]
    fn per_entity_counters_are_independent() {
        let m = CoreMetrics::new();
        m.import_rows_total
            .get_or_create(&EntityLabel { entity: "contact".into() })
            .inc_by(5);
        m.import_rows_total
            .get_or_create(&EntityLabel { entity: "account".into() })
            .inc_by(9);
        let output = m.encode();
        assert!(output.contains("contact"));
        assert!(output.contains("account"));
    }
}
