use std::collections::HashMap;
use tracing::debug;

use crate::domain::{Aggregate, BucketKey, Granularity};
use crate::error::{PipelineError, Result};
use crate::metrics::AggregateMetrics;
use crate::pipeline::processing::temporal::derive_coarser_key;
use crate::pipeline::processing::topk::hash_partition;

/// View totals per bucket key.
///
/// Summation is associative and commutative, so totals computed independently
/// per partition can be merged in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Totals {
    sums: HashMap<BucketKey, u64>,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: BucketKey, views: u64) -> Result<()> {
        let slot = self.sums.entry(key).or_insert(0);
        *slot = slot
            .checked_add(views)
            .ok_or_else(|| PipelineError::Invariant("view total overflowed u64".to_string()))?;
        Ok(())
    }

    pub fn merge(mut self, other: Totals) -> Result<Totals> {
        if self.sums.len() < other.sums.len() {
            return other.merge(self);
        }
        for (key, views) in other.sums {
            self.add(key, views)?;
        }
        Ok(self)
    }

    pub fn get(&self, key: &BucketKey) -> Option<u64> {
        self.sums.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, u64)> + '_ {
        self.sums.iter().map(|(k, v)| (k, *v))
    }

    /// Keep only totals strictly greater than `cutoff`.
    pub fn retain_above(mut self, cutoff: u64) -> Totals {
        self.sums.retain(|_, views| *views > cutoff);
        self
    }

    /// Drop every key that `survivors` does not hold.
    pub fn restrict_to(mut self, survivors: &Totals) -> Totals {
        self.sums.retain(|key, _| survivors.sums.contains_key(key));
        self
    }

    /// Hash-partition these totals and roll each partition up to `target` on
    /// its own. The result holds partial coarser totals: a key whose finer
    /// keys landed in different partitions appears in each of them.
    pub fn partial_roll_ups(&self, target: Granularity, partitions: usize) -> Result<Vec<Totals>> {
        hash_partition(self.clone().into_aggregates(), partitions)
            .into_iter()
            .map(|part| aggregate(part.into_iter().map(|a| (a.key, a.total_views)))?.roll_up(target))
            .collect()
    }

    /// Sum these totals into keys one granularity coarser.
    pub fn roll_up(&self, target: Granularity) -> Result<Totals> {
        let mut out = Totals::new();
        for (key, views) in self.iter() {
            out.add(derive_coarser_key(key, target)?, views)?;
        }
        Ok(out)
    }

    /// Aggregates in key order.
    pub fn into_aggregates(self) -> Vec<Aggregate> {
        let mut out: Vec<Aggregate> = self
            .sums
            .into_iter()
            .map(|(key, total_views)| Aggregate { key, total_views })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

/// Sum `(key, views)` pairs into totals.
pub fn aggregate<I>(records: I) -> Result<Totals>
where
    I: IntoIterator<Item = (BucketKey, u64)>,
{
    let mut totals = Totals::new();
    for (key, views) in records {
        totals.add(key, views)?;
    }
    Ok(totals)
}

/// Applies the low-traffic cutoff and promotes totals up the granularity ladder.
#[derive(Debug, Clone, Copy)]
pub struct IntervalAggregator {
    pub cutoff: u64,
}

impl IntervalAggregator {
    pub fn new(cutoff: u64) -> Self {
        Self { cutoff }
    }

    pub fn apply_cutoff(&self, granularity: Granularity, totals: Totals) -> Totals {
        let before = totals.len();
        let kept = totals.retain_above(self.cutoff);
        let culled = before - kept.len();
        debug!(
            "{} cutoff >{}: kept {} of {} aggregates",
            granularity,
            self.cutoff,
            kept.len(),
            before
        );
        AggregateMetrics::record_cutoff(granularity, kept.len(), culled);
        kept
    }

    /// Roll already-filtered totals up to `target`, then filter again. The
    /// cutoff is judged on the coarser total, not inherited from finer levels.
    pub fn promote(&self, filtered: &Totals, target: Granularity) -> Result<Totals> {
        let rolled = filtered.roll_up(target)?;
        Ok(self.apply_cutoff(target, rolled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bucket, EntityId};
    use chrono::NaiveDate;

    fn key(granularity: Granularity, y: i32, m: u32, d: u32, page: &str) -> BucketKey {
        BucketKey {
            bucket: Bucket {
                granularity,
                period_start: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            },
            entity: EntityId::new("en", page),
        }
    }

    fn day(d: u32, page: &str) -> BucketKey {
        key(Granularity::Day, 2016, 7, d, page)
    }

    #[test]
    fn equal_keys_are_summed_not_overwritten() {
        let totals = aggregate(vec![(day(1, "A"), 10), (day(1, "A"), 5), (day(2, "A"), 7)]).unwrap();
        assert_eq!(totals.get(&day(1, "A")), Some(15));
        assert_eq!(totals.get(&day(2, "A")), Some(7));
    }

    #[test]
    fn partial_sums_merge_in_any_split_and_order() {
        let pairs = vec![
            (day(1, "A"), 3),
            (day(1, "B"), 4),
            (day(1, "A"), 5),
            (day(2, "A"), 6),
            (day(1, "B"), 1),
        ];
        let whole = aggregate(pairs.clone()).unwrap();
        for split in 0..=pairs.len() {
            let (left, right) = pairs.split_at(split);
            let l = aggregate(left.to_vec()).unwrap();
            let r = aggregate(right.to_vec()).unwrap();
            assert_eq!(l.clone().merge(r.clone()).unwrap(), whole);
            assert_eq!(r.merge(l).unwrap(), whole);
        }
    }

    #[test]
    fn overflow_is_an_invariant_violation() {
        let err = aggregate(vec![(day(1, "A"), u64::MAX), (day(1, "A"), 1)]).unwrap_err();
        assert!(matches!(err, PipelineError::Invariant(_)));
    }

    #[test]
    fn cutoff_is_strict() {
        let agg = IntervalAggregator::new(100);
        let totals = aggregate(vec![(day(1, "A"), 100), (day(1, "B"), 101)]).unwrap();
        let kept = agg.apply_cutoff(Granularity::Day, totals);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get(&day(1, "B")), Some(101));
    }

    #[test]
    fn cutoff_is_reapplied_on_coarser_totals() {
        let agg = IntervalAggregator::new(100);
        // B never clears the daily cutoff, so its days never reach the month
        // even though they would sum past it.
        let daily = aggregate(vec![
            (day(1, "A"), 60),
            (day(2, "A"), 60),
            (day(1, "B"), 90),
            (day(2, "B"), 90),
            (day(3, "C"), 150),
        ])
        .unwrap();
        let daily = agg.apply_cutoff(Granularity::Day, daily);
        assert_eq!(daily.len(), 1);

        let monthly = agg.promote(&daily, Granularity::Month).unwrap();
        assert_eq!(monthly.get(&key(Granularity::Month, 2016, 7, 1, "C")), Some(150));
        assert_eq!(monthly.len(), 1);
    }

    #[test]
    fn month_totals_roll_up_to_year() {
        let agg = IntervalAggregator::new(100);
        let monthly = aggregate(vec![
            (key(Granularity::Month, 2016, 6, 1, "A"), 80),
            (key(Granularity::Month, 2016, 7, 1, "A"), 80),
        ])
        .unwrap();
        let yearly = agg.promote(&monthly, Granularity::Year).unwrap();
        assert_eq!(yearly.get(&key(Granularity::Year, 2016, 1, 1, "A")), Some(160));
    }

    #[test]
    fn rollup_must_go_coarser() {
        let daily = aggregate(vec![(day(1, "A"), 500)]).unwrap();
        assert!(daily.roll_up(Granularity::Day).is_err());
        assert!(daily.roll_up(Granularity::Year).is_err());
    }

    #[test]
    fn partial_roll_ups_sum_back_to_the_full_roll_up() {
        let daily = aggregate((1..=20).map(|d| (day(d, "A"), u64::from(d)))).unwrap();
        let partials = daily.partial_roll_ups(Granularity::Month, 4).unwrap();
        assert_eq!(partials.len(), 4);

        let merged = partials
            .into_iter()
            .try_fold(Totals::new(), |acc, part| acc.merge(part))
            .unwrap();
        assert_eq!(merged, daily.roll_up(Granularity::Month).unwrap());
    }

    #[test]
    fn restrict_to_keeps_only_surviving_keys() {
        let partial = aggregate(vec![(day(1, "A"), 60), (day(1, "B"), 60)]).unwrap();
        let survivors = aggregate(vec![(day(1, "A"), 160)]).unwrap();
        let kept = partial.restrict_to(&survivors);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get(&day(1, "A")), Some(60));
    }
}
