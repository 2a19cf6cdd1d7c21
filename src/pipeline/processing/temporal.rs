//! Bucket key derivation. The day comes from the source context, never from
//! the line itself; coarser keys are pure truncations of the day.

use chrono::{Datelike, Duration, NaiveDate};

use crate::domain::{Bucket, BucketKey, EntityId, Granularity, ParsedRecord, SourceContext};
use crate::error::{PipelineError, Result};

pub fn derive_day_key(ctx: &SourceContext, record: &ParsedRecord) -> BucketKey {
    BucketKey {
        bucket: Bucket {
            granularity: Granularity::Day,
            period_start: ctx.date,
        },
        entity: EntityId::from_record(record),
    }
}

/// Nearest preceding Sunday (the day itself when it is a Sunday).
pub fn derive_week_key(day_key: &BucketKey) -> Result<BucketKey> {
    expect_granularity(day_key, Granularity::Day)?;
    let day = day_key.bucket.period_start;
    let sunday_offset = i64::from(day.weekday().number_from_monday() % 7);
    Ok(retag(day_key, Granularity::Week, day - Duration::days(sunday_offset)))
}

pub fn derive_month_key(day_key: &BucketKey) -> Result<BucketKey> {
    expect_granularity(day_key, Granularity::Day)?;
    let day = day_key.bucket.period_start;
    Ok(retag(day_key, Granularity::Month, first_of_month(day)?))
}

pub fn derive_year_key(month_key: &BucketKey) -> Result<BucketKey> {
    expect_granularity(month_key, Granularity::Month)?;
    let year = month_key.bucket.period_start.year();
    let start = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| PipelineError::Invariant(format!("no January 1st in year {}", year)))?;
    Ok(retag(month_key, Granularity::Year, start))
}

/// Derive the key one level up from `key`. Only the rollup edges the pipeline
/// uses are defined: day to week, day to month, month to year.
pub fn derive_coarser_key(key: &BucketKey, target: Granularity) -> Result<BucketKey> {
    match (key.granularity(), target) {
        (Granularity::Day, Granularity::Week) => derive_week_key(key),
        (Granularity::Day, Granularity::Month) => derive_month_key(key),
        (Granularity::Month, Granularity::Year) => derive_year_key(key),
        (from, to) => Err(PipelineError::Invariant(format!(
            "no rollup from {} to {}",
            from, to
        ))),
    }
}

fn first_of_month(day: NaiveDate) -> Result<NaiveDate> {
    day.with_day(1)
        .ok_or_else(|| PipelineError::Invariant(format!("cannot truncate {} to month", day)))
}

fn retag(key: &BucketKey, granularity: Granularity, period_start: NaiveDate) -> BucketKey {
    BucketKey {
        bucket: Bucket {
            granularity,
            period_start,
        },
        entity: key.entity.clone(),
    }
}

fn expect_granularity(key: &BucketKey, expected: Granularity) -> Result<()> {
    if key.granularity() == expected {
        Ok(())
    } else {
        Err(PipelineError::Invariant(format!(
            "expected a {} key, got {}",
            expected, key.bucket
        )))
    }
}
