//! Rank Phase Metrics

use crate::domain::Granularity;
use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct RankMetrics;

impl RankMetrics {
    pub fn record_document(granularity: Granularity, entries: usize) {
        let level = granularity.name();
        ::metrics::counter!(phase_metric!(counter, "rank", "documents"), "granularity" => level).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "rank", "entries_per_document"), "granularity" => level)
            .record(entries as f64);
    }

    pub fn record_page_histories(documents: usize) {
        ::metrics::counter!(phase_metric!(counter, "rank", "page_histories")).increment(documents as u64);
    }
}

impl PhaseMetrics for RankMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "rank", "documents"));
        let _ = counter!(phase_metric!(counter, "rank", "page_histories"));
        let _ = histogram!(phase_metric!(histogram, "rank", "entries_per_document"));
    }

    fn phase_name() -> &'static str {
        "rank"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "rank", "documents"),
                metric_type: MetricType::Counter,
                help: "Ranked documents emitted",
                labels: vec!["granularity"],
            },
            MetricDoc {
                name: phase_metric!(counter, "rank", "page_histories"),
                metric_type: MetricType::Counter,
                help: "Page daily-history documents emitted",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "rank", "entries_per_document"),
                metric_type: MetricType::Histogram,
                help: "Entries per ranked document",
                labels: vec!["granularity"],
            },
        ]
    }
}
