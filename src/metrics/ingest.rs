//! Ingest Phase Metrics
//!
//! Lines read from line sources and sources skipped during discovery.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct IngestMetrics;

impl IngestMetrics {
    /// Record one fully read source
    pub fn record_source_read(lines: u64) {
        ::metrics::counter!(phase_metric!(counter, "ingest", "sources_read")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "ingest", "lines_read")).increment(lines);
        ::metrics::histogram!(phase_metric!(histogram, "ingest", "lines_per_source")).record(lines as f64);
    }

    /// Record lines dropped because they are not valid UTF-8
    pub fn record_undecodable(lines: u64) {
        ::metrics::counter!(phase_metric!(counter, "ingest", "undecodable_lines")).increment(lines);
    }

    /// Record a file skipped because its name carries no timestamp
    pub fn record_source_skipped() {
        ::metrics::counter!(phase_metric!(counter, "ingest", "sources_skipped")).increment(1);
    }

    /// Record how many sources a run was given
    pub fn record_run_sources(sources: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "ingest", "sources_in_run")).set(sources as f64);
    }
}

impl PhaseMetrics for IngestMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "ingest", "sources_read"));
        let _ = counter!(phase_metric!(counter, "ingest", "lines_read"));
        let _ = counter!(phase_metric!(counter, "ingest", "undecodable_lines"));
        let _ = counter!(phase_metric!(counter, "ingest", "sources_skipped"));
        let _ = histogram!(phase_metric!(histogram, "ingest", "lines_per_source"));
        let _ = gauge!(phase_metric!(gauge, "ingest", "sources_in_run"));
    }

    fn phase_name() -> &'static str {
        "ingest"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "ingest", "sources_read"),
                metric_type: MetricType::Counter,
                help: "Line sources read to the end",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "lines_read"),
                metric_type: MetricType::Counter,
                help: "Raw lines read across all sources",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "undecodable_lines"),
                metric_type: MetricType::Counter,
                help: "Lines skipped because they are not valid UTF-8",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "sources_skipped"),
                metric_type: MetricType::Counter,
                help: "Files skipped because their name embeds no yyyymmdd-hh timestamp",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "ingest", "lines_per_source"),
                metric_type: MetricType::Histogram,
                help: "Lines per source",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(gauge, "ingest", "sources_in_run"),
                metric_type: MetricType::Gauge,
                help: "Sources given to the most recent run",
                labels: vec![],
            },
        ]
    }
}
