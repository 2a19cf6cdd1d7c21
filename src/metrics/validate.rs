//! Validate Phase Metrics
//!
//! Accepted lines and rejections broken down by reason. Operators watch the
//! per-reason counters to judge feed quality.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};
use crate::pipeline::processing::{RejectionReason, RejectionTally};

pub struct ValidateMetrics;

impl ValidateMetrics {
    /// Record the merged tally of one run
    pub fn record_tally(tally: &RejectionTally) {
        ::metrics::counter!(phase_metric!(counter, "validate", "accepted")).increment(tally.accepted);
        for reason in RejectionReason::ALL {
            let n = tally.count(reason);
            if n > 0 {
                ::metrics::counter!(phase_metric!(counter, "validate", "rejected"), "reason" => reason.as_str())
                    .increment(n);
            }
        }
    }

    pub fn record_duration(duration_secs: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "validate", "duration_seconds")).record(duration_secs);
    }
}

impl PhaseMetrics for ValidateMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "validate", "accepted"));
        for reason in RejectionReason::ALL {
            let _ = counter!(phase_metric!(counter, "validate", "rejected"), "reason" => reason.as_str());
        }
        let _ = histogram!(phase_metric!(histogram, "validate", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "validate"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "validate", "accepted"),
                metric_type: MetricType::Counter,
                help: "Lines turned into records",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "validate", "rejected"),
                metric_type: MetricType::Counter,
                help: "Lines rejected, by first failing check",
                labels: vec!["reason"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "validate", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of the validate and daily-sum stage",
                labels: vec![],
            },
        ]
    }
}
