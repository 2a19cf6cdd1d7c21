//! Data shapes shared by every pipeline stage.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

// `pageviews-20160701-010000` style names; only the date and hour are used.
static SOURCE_NAME_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})(\d{2})(\d{2})-(\d{2})\d{4}").expect("static regex compiles")
});

/// Where a raw line came from: the hour it describes plus its position for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    pub source_name: Arc<str>,
    pub date: NaiveDate,
    pub hour: u32,
    pub line_number: u64,
}

impl SourceContext {
    pub fn new(source_name: impl Into<Arc<str>>, date: NaiveDate, hour: u32) -> Self {
        Self {
            source_name: source_name.into(),
            date,
            hour,
            line_number: 0,
        }
    }

    /// Build a context from an hourly dump file name such as
    /// `pageviews-20160701-010000` (date at offsets 10..18, hour at 19..21).
    pub fn from_source_name(name: &str) -> Result<Self> {
        let bad_name = || PipelineError::SourceName {
            name: name.to_string(),
        };
        let caps = SOURCE_NAME_TIMESTAMP.captures(name).ok_or_else(bad_name)?;
        let field = |i: usize| caps[i].parse::<u32>().map_err(|_| bad_name());

        let year = caps[1].parse::<i32>().map_err(|_| bad_name())?;
        let date = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?).ok_or_else(bad_name)?;
        let hour = field(4)?;
        if hour > 23 {
            return Err(bad_name());
        }
        Ok(Self::new(name, date, hour))
    }

    pub fn with_line(&self, line_number: u64) -> Self {
        Self {
            line_number,
            ..self.clone()
        }
    }
}

/// A validated hourly page-view line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub domain_code: String,
    pub page_extension: String,
    pub view_count: u32,
    pub response_bytes: u64,
}

/// Stable page identity: `"<domain> <extension>"`.
///
/// Ordering is plain byte order, which is the ranking tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(domain_code: &str, page_extension: &str) -> Self {
        Self(format!("{} {}", domain_code, page_extension))
    }

    pub fn from_record(record: &ParsedRecord) -> Self {
        Self::new(&record.domain_code, &record.page_extension)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain_code(&self) -> &str {
        self.0.split_once(' ').map_or(self.0.as_str(), |(d, _)| d)
    }

    pub fn page_extension(&self) -> &str {
        self.0.split_once(' ').map_or("", |(_, ext)| ext)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rollup level. Variants are declared finest to coarsest, so `Ord` reads as
/// "is coarser than".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub fn name(self) -> &'static str {
        match self {
            Granularity::Day => "daily",
            Granularity::Week => "weekly",
            Granularity::Month => "monthly",
            Granularity::Year => "yearly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A (granularity, period) pair such as the calendar day 2016-07-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    pub granularity: Granularity,
    pub period_start: NaiveDate,
}

impl Bucket {
    /// Human-readable interval label: `yyyymmdd` for days and weeks,
    /// `yyyymm` for months, `yyyy` for years.
    pub fn label(&self) -> String {
        let fmt = match self.granularity {
            Granularity::Day | Granularity::Week => "%Y%m%d",
            Granularity::Month => "%Y%m",
            Granularity::Year => "%Y",
        };
        self.period_start.format(fmt).to_string()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.granularity, self.label())
    }
}

/// Aggregation key; equal keys are always summed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub bucket: Bucket,
    pub entity: EntityId,
}

impl BucketKey {
    pub fn granularity(&self) -> Granularity {
        self.bucket.granularity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub key: BucketKey,
    pub total_views: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_name_follows_hourly_dump_convention() {
        let ctx = SourceContext::from_source_name("pageviews-20160701-170000").unwrap();
        assert_eq!(ctx.date, NaiveDate::from_ymd_opt(2016, 7, 1).unwrap());
        assert_eq!(ctx.hour, 17);
        assert_eq!(&*ctx.source_name, "pageviews-20160701-170000");
    }

    #[test]
    fn source_name_without_timestamp_is_rejected() {
        let err = SourceContext::from_source_name("README.md").unwrap_err();
        assert!(matches!(err, PipelineError::SourceName { .. }));
        assert!(SourceContext::from_source_name("pageviews-20161301-000000").is_err());
    }

    #[test]
    fn entity_id_splits_on_first_space() {
        let id = EntityId::new("en", "Main_Page");
        assert_eq!(id.as_str(), "en Main_Page");
        assert_eq!(id.domain_code(), "en");
        assert_eq!(id.page_extension(), "Main_Page");
    }

    #[test]
    fn labels_truncate_to_granularity() {
        let day = NaiveDate::from_ymd_opt(2016, 7, 1).unwrap();
        let bucket = |granularity| Bucket {
            granularity,
            period_start: day,
        };
        assert_eq!(bucket(Granularity::Day).label(), "20160701");
        assert_eq!(bucket(Granularity::Week).label(), "20160701");
        assert_eq!(bucket(Granularity::Month).label(), "201607");
        assert_eq!(bucket(Granularity::Year).label(), "2016");
    }
}
