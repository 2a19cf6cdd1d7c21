use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{Aggregate, EntityId, Granularity};
use crate::error::Result;
use crate::metrics::{IngestMetrics, RankMetrics, ValidateMetrics};
use crate::pipeline::ingestion::LineSource;
use crate::pipeline::processing::aggregate::{IntervalAggregator, Totals};
use crate::pipeline::processing::rank::page_histories;
use crate::pipeline::processing::temporal::derive_day_key;
use crate::pipeline::processing::topk::{hash_partition, BoundedTopKSelector, SelectionStrategy};
use crate::pipeline::processing::{PageViewValidator, RankSerializer, RecordValidator, RejectionTally, ValidationOutcome};
use crate::pipeline::storage::{DocumentKind, DocumentSink};

/// What one granularity level produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub granularity: Granularity,
    /// Aggregates that survived the cutoff at this level.
    pub aggregates: usize,
    pub documents: usize,
    pub entries: usize,
}

/// Result of a complete rollup run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub sources: usize,
    pub lines_read: u64,
    /// Lines skipped before validation because they are not valid UTF-8.
    pub undecodable_lines: u64,
    pub tally: RejectionTally,
    pub levels: Vec<LevelSummary>,
    pub page_history_documents: usize,
    pub strategy: SelectionStrategy,
    pub top_k: usize,
    pub cutoff: u64,
    /// SHA-256 over every emitted document line, in emission order.
    pub output_digest: String,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn level(&self, granularity: Granularity) -> Option<&LevelSummary> {
        self.levels.iter().find(|l| l.granularity == granularity)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Validation-only pass over a set of sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub sources: usize,
    pub lines_read: u64,
    pub undecodable_lines: u64,
    pub tally: RejectionTally,
}

/// Everything one source contributes before the merge barrier.
#[derive(Debug, Default)]
struct SourcePass {
    lines_read: u64,
    undecodable_lines: u64,
    tally: RejectionTally,
    daily: Totals,
}

impl SourcePass {
    fn merge(self, other: SourcePass) -> Result<SourcePass> {
        Ok(SourcePass {
            lines_read: self.lines_read + other.lines_read,
            undecodable_lines: self.undecodable_lines + other.undecodable_lines,
            tally: self.tally.merge(other.tally),
            daily: self.daily.merge(other.daily)?,
        })
    }
}

/// Drives validation, temporal rollup, top-K selection and serialization.
pub struct RollupPipeline {
    config: Config,
    validator: Box<dyn RecordValidator>,
}

impl RollupPipeline {
    pub fn new(config: Config) -> Self {
        Self::with_validator(config, Box::new(PageViewValidator::new()))
    }

    pub fn with_validator(config: Config, validator: Box<dyn RecordValidator>) -> Self {
        Self { config, validator }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate every source without aggregating or writing anything.
    pub fn validate_only(&self, sources: &[Box<dyn LineSource>]) -> Result<ValidationReport> {
        IngestMetrics::record_run_sources(sources.len());
        let pass = merge_passes(self.scan_all(sources, false)?)?;
        ValidateMetrics::record_tally(&pass.tally);
        Ok(ValidationReport {
            sources: sources.len(),
            lines_read: pass.lines_read,
            undecodable_lines: pass.undecodable_lines,
            tally: pass.tally,
        })
    }

    /// Run the full rollup over `sources`, writing documents to `sink`.
    ///
    /// Sources are scanned in parallel; every level starts only after the
    /// level it derives from is complete. Under the partition-local strategy
    /// each source's day sums are one partition of the day level, and each
    /// coarser level is partitioned by rolling up hash partitions of the
    /// level below it.
    pub fn run(&self, sources: &[Box<dyn LineSource>], sink: &mut dyn DocumentSink) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("rollup", run_id = %run_id);
        let _enter = span.enter();

        let started_at = Utc::now();
        let clock = Instant::now();
        let top_k = self.config.top_k();
        let cutoff = self.config.ranking.cutoff;
        let strategy = self.config.ranking.strategy;
        info!(
            "Starting rollup over {} sources (top_k={}, cutoff=>{}, strategy={})",
            sources.len(),
            top_k,
            cutoff,
            strategy
        );
        IngestMetrics::record_run_sources(sources.len());

        let passes = self.scan_all(sources, true)?;
        let day_partials: Vec<Totals> = match strategy {
            SelectionStrategy::Exact => Vec::new(),
            SelectionStrategy::PartitionLocal => passes.iter().map(|p| p.daily.clone()).collect(),
        };
        let pass = merge_passes(passes)?;
        ValidateMetrics::record_tally(&pass.tally);
        ValidateMetrics::record_duration(clock.elapsed().as_secs_f64());
        info!(
            "Validated {} lines: {} accepted, {} rejected, {} undecodable",
            pass.lines_read,
            pass.tally.accepted,
            pass.tally.total_rejected(),
            pass.undecodable_lines
        );
        if pass.tally.accepted == 0 && pass.lines_read > 0 {
            warn!("No line passed validation");
        }

        let aggregator = IntervalAggregator::new(cutoff);
        let daily = aggregator.apply_cutoff(Granularity::Day, pass.daily);

        let mut emitter = LevelEmitter {
            selector: BoundedTopKSelector::new(top_k, strategy),
            partitions: self.config.execution.partitions,
            sink,
            digest: Sha256::new(),
            ranked_pages: BTreeSet::new(),
        };

        let mut levels = vec![emitter.emit(Granularity::Day, &daily, day_partials)?];
        if self.config.rollup.weekly {
            let weekly = aggregator.promote(&daily, Granularity::Week)?;
            let partials = emitter.partials_from(&daily, Granularity::Week)?;
            levels.push(emitter.emit(Granularity::Week, &weekly, partials)?);
        }
        let monthly = aggregator.promote(&daily, Granularity::Month)?;
        let partials = emitter.partials_from(&daily, Granularity::Month)?;
        levels.push(emitter.emit(Granularity::Month, &monthly, partials)?);
        let yearly = aggregator.promote(&monthly, Granularity::Year)?;
        let partials = emitter.partials_from(&monthly, Granularity::Year)?;
        levels.push(emitter.emit(Granularity::Year, &yearly, partials)?);

        let page_history_documents = if self.config.rollup.page_history {
            emitter.emit_page_histories(&daily)?
        } else {
            0
        };

        let LevelEmitter { sink, digest, .. } = emitter;
        sink.finish()?;

        let summary = RunSummary {
            run_id,
            started_at,
            sources: sources.len(),
            lines_read: pass.lines_read,
            undecodable_lines: pass.undecodable_lines,
            tally: pass.tally,
            levels,
            page_history_documents,
            strategy,
            top_k,
            cutoff,
            output_digest: hex::encode(digest.finalize()),
            duration_secs: clock.elapsed().as_secs_f64(),
        };
        info!(
            "Rollup finished in {:.2}s, output digest {}",
            summary.duration_secs, summary.output_digest
        );
        Ok(summary)
    }

    fn scan_all(&self, sources: &[Box<dyn LineSource>], sum_days: bool) -> Result<Vec<SourcePass>> {
        let validator = self.validator.as_ref();
        sources
            .par_iter()
            .map(|source| scan_source(source.as_ref(), validator, sum_days))
            .collect()
    }
}

fn merge_passes(passes: Vec<SourcePass>) -> Result<SourcePass> {
    passes
        .into_iter()
        .try_fold(SourcePass::default(), SourcePass::merge)
}

fn scan_source(source: &dyn LineSource, validator: &dyn RecordValidator, sum_days: bool) -> Result<SourcePass> {
    let ctx = source.context();
    let mut pass = SourcePass::default();
    let stats = source.for_each_line(&mut |line_number, line| {
        let outcome = validator.validate(line, &ctx.with_line(line_number));
        pass.tally.observe(&outcome);
        match outcome {
            ValidationOutcome::Valid(record) if sum_days => {
                pass.daily
                    .add(derive_day_key(ctx, &record), u64::from(record.view_count))?;
            }
            ValidationOutcome::Valid(_) => {}
            ValidationOutcome::Rejected(reason) => {
                debug!(source = %ctx.source_name, line = line_number, %reason, "rejected line");
            }
        }
        Ok(())
    })?;
    pass.lines_read = stats.lines;
    pass.undecodable_lines = stats.undecodable;
    debug!(
        "{}: {} lines, {} accepted",
        ctx.source_name, pass.lines_read, pass.tally.accepted
    );
    Ok(pass)
}

struct LevelEmitter<'s> {
    selector: BoundedTopKSelector,
    partitions: usize,
    sink: &'s mut dyn DocumentSink,
    digest: Sha256,
    ranked_pages: BTreeSet<EntityId>,
}

impl LevelEmitter<'_> {
    fn write(&mut self, kind: DocumentKind, json: &str) -> Result<()> {
        self.digest.update(json.as_bytes());
        self.digest.update(b"\n");
        self.sink.write(kind, json)
    }

    /// Partial totals at `target` for the partition-local strategy; the exact
    /// strategy partitions the merged totals instead and needs none.
    fn partials_from(&self, finer: &Totals, target: Granularity) -> Result<Vec<Totals>> {
        match self.selector.strategy {
            SelectionStrategy::Exact => Ok(Vec::new()),
            SelectionStrategy::PartitionLocal => finer.partial_roll_ups(target, self.partitions),
        }
    }

    fn partition(&self, totals: &Totals, partials: Vec<Totals>) -> Vec<Vec<Aggregate>> {
        match self.selector.strategy {
            SelectionStrategy::Exact => hash_partition(totals.clone().into_aggregates(), self.partitions),
            SelectionStrategy::PartitionLocal => partials
                .into_iter()
                .map(|partial| partial.restrict_to(totals).into_aggregates())
                .collect(),
        }
    }

    fn emit(&mut self, granularity: Granularity, totals: &Totals, partials: Vec<Totals>) -> Result<LevelSummary> {
        let aggregates = totals.len();
        let partitioned = self.partition(totals, partials);
        let documents = RankSerializer::rank_all(self.selector.select(partitioned)?);

        let mut entries = 0;
        for doc in &documents {
            self.ranked_pages.extend(doc.entities().cloned());
            entries += doc.top_pages.len();
            RankMetrics::record_document(granularity, doc.top_pages.len());
            let json = serde_json::to_string(doc)?;
            self.write(DocumentKind::Ranked(granularity), &json)?;
        }

        info!(
            "{}: {} aggregates above cutoff, {} documents, {} entries",
            granularity,
            aggregates,
            documents.len(),
            entries
        );
        Ok(LevelSummary {
            granularity,
            aggregates,
            documents: documents.len(),
            entries,
        })
    }

    fn emit_page_histories(&mut self, daily: &Totals) -> Result<usize> {
        let pages = std::mem::take(&mut self.ranked_pages);
        let histories = page_histories(daily, &pages);
        for doc in &histories {
            let json = serde_json::to_string(doc)?;
            self.write(DocumentKind::PageHistory, &json)?;
        }
        RankMetrics::record_page_histories(histories.len());
        info!("page history: {} documents", histories.len());
        Ok(histories.len())
    }
}
