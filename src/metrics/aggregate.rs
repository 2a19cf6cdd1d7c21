//! Aggregate Phase Metrics

use crate::domain::Granularity;
use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct AggregateMetrics;

impl AggregateMetrics {
    /// Record what the low-traffic cutoff kept and culled at one granularity
    pub fn record_cutoff(granularity: Granularity, kept: usize, culled: usize) {
        let level = granularity.name();
        ::metrics::counter!(phase_metric!(counter, "aggregate", "kept"), "granularity" => level)
            .increment(kept as u64);
        ::metrics::counter!(phase_metric!(counter, "aggregate", "culled"), "granularity" => level)
            .increment(culled as u64);
    }
}

impl PhaseMetrics for AggregateMetrics {
    fn register_metrics() {
        use metrics::counter;

        let _ = counter!(phase_metric!(counter, "aggregate", "kept"));
        let _ = counter!(phase_metric!(counter, "aggregate", "culled"));
    }

    fn phase_name() -> &'static str {
        "aggregate"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "aggregate", "kept"),
                metric_type: MetricType::Counter,
                help: "Aggregates above the low-traffic cutoff",
                labels: vec!["granularity"],
            },
            MetricDoc {
                name: phase_metric!(counter, "aggregate", "culled"),
                metric_type: MetricType::Counter,
                help: "Aggregates dropped by the low-traffic cutoff",
                labels: vec!["granularity"],
            },
        ]
    }
}
