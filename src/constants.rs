/// Default number of ranked entries kept per interval
pub const POPULAR_PAGES_LIMIT: i64 = 500;

/// Default low-traffic cutoff; aggregates must be strictly greater to survive
pub const LOW_TRAFFIC_CUTOFF: u64 = 100;

/// Default number of hash partitions feeding the top-K stage
pub const DEFAULT_PARTITIONS: usize = 8;

/// Only English Wikipedia lines are ranked
pub const ENGLISH_DOMAIN_PREFIX: &str = "en ";

/// Extension consisting of a lone hyphen; a known malformed entry in the feed
pub const HYPHEN_ONLY_EXTENSION: &str = "- ";

pub const EXPECTED_FIELD_COUNT: usize = 4;

pub const WIKI_URL_PREFIX: &str = "https://en.wikipedia.org/wiki/";

// Output file names, one JSON document per line
pub const DAILY_OUTPUT: &str = "daily.jsonl";
pub const WEEKLY_OUTPUT: &str = "weekly.jsonl";
pub const MONTHLY_OUTPUT: &str = "monthly.jsonl";
pub const YEARLY_OUTPUT: &str = "yearly.jsonl";
pub const PAGE_HISTORY_OUTPUT: &str = "page_history.jsonl";
pub const SUMMARY_OUTPUT: &str = "summary.json";
pub const METRICS_SNAPSHOT_OUTPUT: &str = "metrics.prom";

// Environment overrides for `Config`
pub const ENV_TOP_K: &str = "PAGEVIEWS_TOP_K";
pub const ENV_CUTOFF: &str = "PAGEVIEWS_CUTOFF";
pub const ENV_STRATEGY: &str = "PAGEVIEWS_STRATEGY";
pub const ENV_PARTITIONS: &str = "PAGEVIEWS_PARTITIONS";
pub const ENV_OUTPUT_DIR: &str = "PAGEVIEWS_OUTPUT_DIR";
