//! Phase-organised metrics for the rollup pipeline
//!
//! Each pipeline phase owns a submodule that records its metrics and documents
//! them for the registry, which detects naming conflicts at startup.

pub mod aggregate;
pub mod ingest;
pub mod rank;
pub mod registry;
pub mod validate;

pub use aggregate::AggregateMetrics;
pub use ingest::IngestMetrics;
pub use rank::RankMetrics;
pub use validate::ValidateMetrics;

use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Initialize the global metrics recorder.
///
/// Idempotent. Installs a Prometheus recorder and keeps its handle so a batch
/// run can render a snapshot on exit, then registers all phase metrics.
pub fn init_metrics() {
    INIT.call_once(|| {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.install_recorder() {
            Ok(handle) => {
                if HANDLE.set(handle).is_err() {
                    warn!("METRICS: handle already stored");
                }
                registry::register_all_metrics();
                info!("Prometheus recorder installed");
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
            }
        }
    });
}

/// Prometheus text exposition of everything recorded so far, if a recorder
/// was installed by [`init_metrics`].
pub fn render_snapshot() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Trait for phase-specific metrics collections
pub trait PhaseMetrics {
    /// Register all metrics for this phase
    fn register_metrics();

    /// Phase name used as the metric prefix
    fn phase_name() -> &'static str;

    /// Documentation for all metrics in this phase
    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Builds metric names following `pageviews_{phase}_{name}[_total]`.
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("pageviews_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("pageviews_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("pageviews_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
