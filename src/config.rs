use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_PARTITIONS, ENV_CUTOFF, ENV_OUTPUT_DIR, ENV_PARTITIONS, ENV_STRATEGY, ENV_TOP_K,
    LOW_TRAFFIC_CUTOFF, POPULAR_PAGES_LIMIT,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::SelectionStrategy;

/// Run configuration. Every section and key is optional in the TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ranking: RankingConfig,
    pub execution: ExecutionConfig,
    pub rollup: RollupConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Entries per ranked document; zero or negative yields empty documents.
    pub top_k: i64,
    /// Aggregates must be strictly greater than this to survive a level.
    pub cutoff: u64,
    pub strategy: SelectionStrategy,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: POPULAR_PAGES_LIMIT,
            cutoff: LOW_TRAFFIC_CUTOFF,
            strategy: SelectionStrategy::Exact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Hash partitions feeding the top-K stage.
    pub partitions: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    pub weekly: bool,
    pub page_history: bool,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            weekly: false,
            page_history: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub log_dir: PathBuf,
    pub metrics_snapshot: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            metrics_snapshot: false,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file if given, then `PAGEVIEWS_*` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_TOP_K) {
            self.ranking.top_k = parse_env(ENV_TOP_K, &v)?;
        }
        if let Some(v) = lookup(ENV_CUTOFF) {
            self.ranking.cutoff = parse_env(ENV_CUTOFF, &v)?;
        }
        if let Some(v) = lookup(ENV_STRATEGY) {
            self.ranking.strategy = v.parse().map_err(PipelineError::Config)?;
        }
        if let Some(v) = lookup(ENV_PARTITIONS) {
            self.execution.partitions = parse_env(ENV_PARTITIONS, &v)?;
        }
        if let Some(v) = lookup(ENV_OUTPUT_DIR) {
            self.output.dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution.partitions == 0 {
            return Err(PipelineError::Config(
                "execution.partitions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// K as a capacity; non-positive values clamp to zero.
    pub fn top_k(&self) -> usize {
        usize::try_from(self.ranking.top_k).unwrap_or(0)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{} has invalid value '{}'", key, value)))
}
