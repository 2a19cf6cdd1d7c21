use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use pageview_rollup::config::Config;
use pageview_rollup::constants::{METRICS_SNAPSHOT_OUTPUT, SUMMARY_OUTPUT};
use pageview_rollup::logging;
use pageview_rollup::metrics;
use pageview_rollup::pipeline::processing::{RejectionReason, RejectionTally, SelectionStrategy};
use pageview_rollup::pipeline::{discover_sources, JsonLinesSink, LineSource, RollupPipeline};

#[derive(Parser)]
#[command(name = "pageview_rollup")]
#[command(about = "Top-K daily, monthly and yearly rankings from Wikipedia hourly page-view dumps")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, roll up and rank every dump in a directory
    Run {
        #[command(flatten)]
        input: InputArgs,
        /// Directory for the ranked JSON-lines output
        #[arg(long)]
        output: Option<PathBuf>,
        /// Entries per ranked document (zero or negative gives empty documents)
        #[arg(long, allow_hyphen_values = true)]
        top_k: Option<i64>,
        /// Aggregates must be strictly greater than this at every level
        #[arg(long)]
        cutoff: Option<u64>,
        /// Top-K strategy: exact or partition_local
        #[arg(long)]
        strategy: Option<SelectionStrategy>,
        /// Hash partitions feeding the top-K stage
        #[arg(long)]
        partitions: Option<usize>,
        /// Also emit weekly rankings (weeks start on Sunday)
        #[arg(long)]
        weekly: bool,
        /// Skip the per-page daily history documents
        #[arg(long)]
        no_page_history: bool,
        /// Write a Prometheus text snapshot next to the output
        #[arg(long)]
        metrics_snapshot: bool,
    },
    /// Only validate the dumps and report rejection counts
    Validate {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Directory holding pageviews-YYYYMMDD-HHMMSS dumps
    #[arg(long)]
    input: PathBuf,
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_sources(dir: &Path) -> anyhow::Result<Vec<Box<dyn LineSource>>> {
    let sources = discover_sources(dir)
        .with_context(|| format!("cannot list input directory {}", dir.display()))?;
    if sources.is_empty() {
        warn!("No hourly dumps found in {}", dir.display());
    }
    Ok(sources
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn LineSource>)
        .collect())
}

fn print_tally(tally: &RejectionTally) {
    println!("   Accepted: {}", tally.accepted);
    println!("   Rejected: {}", tally.total_rejected());
    for reason in RejectionReason::ALL {
        let n = tally.count(reason);
        if n > 0 {
            println!("     - {}: {}", reason, n);
        }
    }
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            top_k,
            cutoff,
            strategy,
            partitions,
            weekly,
            no_page_history,
            metrics_snapshot,
        } => {
            let mut config = Config::load(input.config.as_deref())?;
            if let Some(dir) = output {
                config.output.dir = dir;
            }
            if let Some(k) = top_k {
                config.ranking.top_k = k;
            }
            if let Some(c) = cutoff {
                config.ranking.cutoff = c;
            }
            if let Some(s) = strategy {
                config.ranking.strategy = s;
            }
            if let Some(p) = partitions {
                config.execution.partitions = p;
            }
            config.rollup.weekly |= weekly;
            config.rollup.page_history &= !no_page_history;
            config.output.metrics_snapshot |= metrics_snapshot;
            config.validate()?;

            let _guard = logging::init_logging(&config.output.log_dir);
            metrics::init_metrics();

            println!("🔄 Rolling up page views from {}...", input.input.display());
            let sources = load_sources(&input.input)?;
            let out_dir = config.output.dir.clone();
            let mut sink = JsonLinesSink::create(&out_dir)
                .with_context(|| format!("cannot create output directory {}", out_dir.display()))?;

            let pipeline = RollupPipeline::new(config);
            let summary = match pipeline.run(&sources, &mut sink) {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Rollup failed: {}", e);
                    println!("❌ Rollup failed: {}", e);
                    return Err(e.into());
                }
            };
            summary.write_json(&out_dir.join(SUMMARY_OUTPUT))?;

            println!("\n📊 Rollup Results (run {}):", summary.run_id);
            println!("   Sources: {}", summary.sources);
            println!("   Lines read: {}", summary.lines_read);
            println!("   Undecodable lines: {}", summary.undecodable_lines);
            print_tally(&summary.tally);
            for level in &summary.levels {
                println!(
                    "   {}: {} documents, {} entries ({} aggregates above cutoff)",
                    level.granularity, level.documents, level.entries, level.aggregates
                );
            }
            println!("   Page histories: {}", summary.page_history_documents);
            println!("   Output digest: {}", summary.output_digest);
            println!("   Output directory: {}", out_dir.display());

            if pipeline.config().output.metrics_snapshot {
                match metrics::render_snapshot() {
                    Some(text) => {
                        let path = out_dir.join(METRICS_SNAPSHOT_OUTPUT);
                        fs::write(&path, text)?;
                        info!("Metrics snapshot written to {}", path.display());
                    }
                    None => warn!("Metrics recorder not installed; no snapshot written"),
                }
            }
            println!("✅ Rollup completed successfully");
        }
        Commands::Validate { input } => {
            let config = Config::load(input.config.as_deref())?;
            let _guard = logging::init_logging(&config.output.log_dir);
            metrics::init_metrics();

            println!("🔍 Validating page views in {}...", input.input.display());
            let sources = load_sources(&input.input)?;
            let report = RollupPipeline::new(config).validate_only(&sources)?;

            println!("\n📊 Validation Results:");
            println!("   Sources: {}", report.sources);
            println!("   Lines read: {}", report.lines_read);
            println!("   Undecodable lines: {}", report.undecodable_lines);
            print_tally(&report.tally);
            if report.lines_read > 0 && report.tally.accepted == 0 {
                bail!("no line in {} passed validation", input.input.display());
            }
        }
    }

    Ok(())
}
