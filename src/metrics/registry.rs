//! Metrics registry for coordinating phase-specific metrics
//!
//! Registers every phase's metrics and detects naming conflicts early.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{info, warn};

/// Register all metrics from all phases
pub fn register_all_metrics() {
    let all_metrics = collect_documentation(true);
    info!("Registered {} total metrics across all phases", all_metrics.len());

    if std::env::var("PAGEVIEWS_METRICS_DEBUG").is_ok() {
        log_metrics_summary(&all_metrics);
    }
}

fn collect_documentation(register: bool) -> HashMap<String, MetricDoc> {
    let mut all_metrics = HashMap::new();
    register_phase_metrics::<super::ingest::IngestMetrics>(&mut all_metrics, register);
    register_phase_metrics::<super::validate::ValidateMetrics>(&mut all_metrics, register);
    register_phase_metrics::<super::aggregate::AggregateMetrics>(&mut all_metrics, register);
    register_phase_metrics::<super::rank::RankMetrics>(&mut all_metrics, register);
    all_metrics
}

/// Register metrics for a specific phase and detect conflicts
fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<String, MetricDoc>, register: bool) {
    if register {
        T::register_metrics();
    }
    let phase_name = T::phase_name();
    for doc in T::metrics_documentation() {
        if all_metrics.contains_key(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' redefined by phase '{}'",
                doc.name, phase_name
            );
        } else {
            all_metrics.insert(doc.name.to_string(), doc);
        }
    }
}

fn log_metrics_summary(all_metrics: &HashMap<String, MetricDoc>) {
    info!("=== Metrics Registry Summary ===");
    let mut by_phase: HashMap<&str, Vec<&MetricDoc>> = HashMap::new();
    for doc in all_metrics.values() {
        by_phase
            .entry(extract_phase_from_metric_name(doc.name))
            .or_default()
            .push(doc);
    }
    for (phase, metrics) in by_phase {
        info!("Phase '{}': {} metrics", phase, metrics.len());
        for metric in metrics {
            info!(
                "  - {} ({:?}, labels {:?}): {}",
                metric.name, metric.metric_type, metric.labels, metric.help
            );
        }
    }
    info!("=== End Metrics Summary ===");
}

/// Extract phase name from metric name (e.g. "pageviews_rank_documents_total" -> "rank")
fn extract_phase_from_metric_name(metric_name: &str) -> &str {
    if let Some(stripped) = metric_name.strip_prefix("pageviews_") {
        if let Some(next_underscore) = stripped.find('_') {
            return &stripped[..next_underscore];
        }
    }
    "unknown"
}
