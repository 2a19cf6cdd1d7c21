//! Bounded top-K selection per bucket.
//!
//! Both strategies end the same way: partial totals for each
//! `(bucket, entity)` are summed and streamed through a [`BoundedSet`], which
//! evicts its minimum whenever a stronger candidate arrives. They differ in
//! what reaches that merge:
//!
//! - [`SelectionStrategy::Exact`] merges every partial total. The result is the
//!   true top-K regardless of how the input was partitioned or ordered.
//! - [`SelectionStrategy::PartitionLocal`] first sorts each partition and keeps
//!   only its first K per bucket, judged on that partition's partial totals.
//!   It never forwards more than K per bucket per partition, but an entity
//!   whose views are spread thinly over many partitions can be cut everywhere
//!   and lost, or survive in only some partitions and be under-counted.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::domain::{Aggregate, Bucket, EntityId};
use crate::error::{PipelineError, Result};

/// An entity's total within one bucket.
///
/// `Ord` is retention strength: more views is greater; on equal views the
/// entity that sorts first is greater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub entity: EntityId,
    pub views: u64,
}

impl Candidate {
    pub fn new(entity: EntityId, views: u64) -> Self {
        Self { entity, views }
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.views
            .cmp(&other.views)
            .then_with(|| other.entity.cmp(&self.entity))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Capacity-K ordered collection. Never holds more than `capacity` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedSet {
    capacity: usize,
    entries: BTreeSet<Candidate>,
}

impl BoundedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// The weakest retained entry, first to be evicted.
    pub fn min(&self) -> Option<&Candidate> {
        self.entries.first()
    }

    /// Insert while below capacity; once full, replace the minimum only when
    /// `candidate` is strictly stronger. Returns whether it was retained.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if !self.is_full() {
            return self.entries.insert(candidate);
        }
        match self.min() {
            Some(min) if candidate > *min => {
                self.entries.pop_first();
                self.entries.insert(candidate)
            }
            _ => false,
        }
    }

    /// Entries strongest first.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> + '_ {
        self.entries.iter().rev()
    }

    pub fn into_sorted_vec(self) -> Vec<Candidate> {
        self.entries.into_iter().rev().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Exact,
    PartitionLocal,
}

impl SelectionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionStrategy::Exact => "exact",
            SelectionStrategy::PartitionLocal => "partition_local",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(SelectionStrategy::Exact),
            "partition_local" | "approximate" => Ok(SelectionStrategy::PartitionLocal),
            other => Err(format!(
                "unknown selection strategy '{}' (expected exact or partition_local)",
                other
            )),
        }
    }
}

/// Exact top-K of a single bucket's candidates.
pub fn select_exact<I>(candidates: I, k: usize) -> BoundedSet
where
    I: IntoIterator<Item = Candidate>,
{
    let mut set = BoundedSet::new(k);
    for candidate in candidates {
        set.offer(candidate);
    }
    set
}

/// Keep the first `k` candidates per bucket of one partition after sorting it
/// by bucket, then strongest first. Buckets whose candidates were all cut are
/// still reported, with no survivors.
pub fn truncate_partition(mut partition: Vec<Aggregate>, k: usize) -> Vec<(Bucket, Vec<Candidate>)> {
    partition.sort_by(|a, b| {
        a.key
            .bucket
            .cmp(&b.key.bucket)
            .then_with(|| b.total_views.cmp(&a.total_views))
            .then_with(|| a.key.entity.cmp(&b.key.entity))
    });

    let mut out: Vec<(Bucket, Vec<Candidate>)> = Vec::new();
    // Counter owned by this partition only; resets at each bucket boundary.
    let mut kept_in_bucket = 0usize;
    for agg in partition {
        let bucket = agg.key.bucket;
        if out.last().map(|(b, _)| *b) != Some(bucket) {
            out.push((bucket, Vec::new()));
            kept_in_bucket = 0;
        }
        kept_in_bucket += 1;
        if kept_in_bucket > k {
            continue;
        }
        if let Some((_, survivors)) = out.last_mut() {
            survivors.push(Candidate::new(agg.key.entity, agg.total_views));
        }
    }
    out
}

/// Spread aggregates over `partitions` hash partitions of their bucket key.
pub fn hash_partition(aggregates: Vec<Aggregate>, partitions: usize) -> Vec<Vec<Aggregate>> {
    let n = partitions.max(1);
    let mut out: Vec<Vec<Aggregate>> = (0..n).map(|_| Vec::new()).collect();
    for agg in aggregates {
        let mut hasher = DefaultHasher::new();
        agg.key.hash(&mut hasher);
        let slot = (hasher.finish() % n as u64) as usize;
        out[slot].push(agg);
    }
    out
}

/// Summed partial totals per bucket, waiting for the bounded merge.
#[derive(Debug, Default)]
struct PartialSums {
    by_bucket: BTreeMap<Bucket, BTreeMap<EntityId, u64>>,
}

impl PartialSums {
    /// Make sure `bucket` gets a set even if nothing is added to it.
    fn touch(&mut self, bucket: Bucket) {
        self.by_bucket.entry(bucket).or_default();
    }

    fn add(&mut self, bucket: Bucket, candidate: Candidate) -> Result<()> {
        let slot = self
            .by_bucket
            .entry(bucket)
            .or_default()
            .entry(candidate.entity)
            .or_insert(0);
        *slot = slot
            .checked_add(candidate.views)
            .ok_or_else(|| PipelineError::Invariant(format!("partial totals in {} overflowed u64", bucket)))?;
        Ok(())
    }

    fn into_sets(self, k: usize) -> BTreeMap<Bucket, BoundedSet> {
        self.by_bucket
            .into_par_iter()
            .map(|(bucket, entities)| {
                let candidates = entities
                    .into_iter()
                    .map(|(entity, views)| Candidate::new(entity, views));
                (bucket, select_exact(candidates, k))
            })
            .collect()
    }
}

/// Per-bucket top-K over aggregates arranged in partitions.
///
/// A key may appear in several partitions, each holding a partial total; the
/// partials are summed before selection.
#[derive(Debug, Clone, Copy)]
pub struct BoundedTopKSelector {
    pub k: usize,
    pub strategy: SelectionStrategy,
}

impl BoundedTopKSelector {
    pub fn new(k: usize, strategy: SelectionStrategy) -> Self {
        Self { k, strategy }
    }

    /// Returns one set per bucket present in the input, keyed in bucket order.
    /// With `k == 0` every set is empty.
    pub fn select(&self, partitions: Vec<Vec<Aggregate>>) -> Result<BTreeMap<Bucket, BoundedSet>> {
        let sums = match self.strategy {
            SelectionStrategy::Exact => Self::sum_all(partitions)?,
            SelectionStrategy::PartitionLocal => self.sum_partition_survivors(partitions)?,
        };
        Ok(sums.into_sets(self.k))
    }

    fn sum_all(partitions: Vec<Vec<Aggregate>>) -> Result<PartialSums> {
        let mut sums = PartialSums::default();
        for agg in partitions.into_iter().flatten() {
            sums.add(agg.key.bucket, Candidate::new(agg.key.entity, agg.total_views))?;
        }
        Ok(sums)
    }

    fn sum_partition_survivors(&self, partitions: Vec<Vec<Aggregate>>) -> Result<PartialSums> {
        let k = self.k;
        let truncated: Vec<Vec<(Bucket, Vec<Candidate>)>> = partitions
            .into_par_iter()
            .map(|partition| truncate_partition(partition, k))
            .collect();

        let mut sums = PartialSums::default();
        for (bucket, survivors) in truncated.into_iter().flatten() {
            sums.touch(bucket);
            for candidate in survivors {
                sums.add(bucket, candidate)?;
            }
        }
        Ok(sums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BucketKey, Granularity};
    use chrono::NaiveDate;

    fn cand(page: &str, views: u64) -> Candidate {
        Candidate::new(EntityId::new("en", page), views)
    }

    fn day_bucket(d: u32) -> Bucket {
        Bucket {
            granularity: Granularity::Day,
            period_start: NaiveDate::from_ymd_opt(2016, 7, d).unwrap(),
        }
    }

    fn agg(d: u32, page: &str, views: u64) -> Aggregate {
        Aggregate {
            key: BucketKey {
                bucket: day_bucket(d),
                entity: EntityId::new("en", page),
            },
            total_views: views,
        }
    }

    fn pages(set: &BoundedSet) -> Vec<String> {
        set.iter().map(|c| c.entity.page_extension().to_string()).collect()
    }

    #[test]
    fn set_never_exceeds_capacity() {
        let mut set = BoundedSet::new(3);
        for (i, v) in [5u64, 1, 9, 3, 7, 2, 8].iter().enumerate() {
            set.offer(cand(&format!("P{}", i), *v));
            assert!(set.len() <= 3);
        }
        let views: Vec<u64> = set.iter().map(|c| c.views).collect();
        assert_eq!(views, vec![9, 8, 7]);
    }

    #[test]
    fn minimum_is_evicted_only_by_stronger_candidate() {
        let mut set = BoundedSet::new(2);
        set.offer(cand("A", 10));
        set.offer(cand("B", 20));
        assert!(!set.offer(cand("C", 5)));
        assert_eq!(set.min().map(|c| c.views), Some(10));
        assert!(set.offer(cand("D", 11)));
        assert_eq!(pages(&set), vec!["B", "D"]);
    }

    #[test]
    fn ties_at_the_boundary_prefer_smaller_entity() {
        let forward = select_exact(vec![cand("B", 50), cand("A", 50)], 1);
        let backward = select_exact(vec![cand("A", 50), cand("B", 50)], 1);
        assert_eq!(forward, backward);
        assert_eq!(pages(&forward), vec!["A"]);
    }

    #[test]
    fn zero_capacity_is_always_empty() {
        let set = select_exact(vec![cand("A", 1_000)], 0);
        assert!(set.is_empty());
        let selector = BoundedTopKSelector::new(0, SelectionStrategy::PartitionLocal);
        let sets = selector.select(vec![vec![agg(1, "A", 500)]]).unwrap();
        assert_eq!(sets.len(), 1);
        assert!(sets.values().all(BoundedSet::is_empty));
    }

    #[test]
    fn exact_groups_buckets_across_partitions() {
        let selector = BoundedTopKSelector::new(2, SelectionStrategy::Exact);
        let sets = selector
            .select(vec![
                vec![agg(1, "A", 10), agg(2, "X", 1)],
                vec![agg(1, "B", 30), agg(1, "C", 20)],
            ])
            .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(pages(&sets[&day_bucket(1)]), vec!["B", "C"]);
        assert_eq!(pages(&sets[&day_bucket(2)]), vec!["X"]);
    }

    #[test]
    fn truncation_keeps_first_k_per_bucket_within_partition() {
        let survivors = truncate_partition(
            vec![agg(1, "A", 1), agg(2, "Z", 9), agg(1, "B", 3), agg(1, "C", 2)],
            2,
        );
        assert_eq!(survivors.len(), 2);
        let (bucket, day1) = &survivors[0];
        assert_eq!(*bucket, day_bucket(1));
        assert_eq!(day1, &vec![cand("B", 3), cand("C", 2)]);
        assert_eq!(survivors[1].1, vec![cand("Z", 9)]);
    }

    #[test]
    fn partition_local_matches_exact_when_winners_share_a_partition() {
        let partitions = vec![
            vec![agg(1, "A", 90), agg(1, "B", 80)],
            vec![agg(1, "C", 10), agg(1, "D", 5)],
        ];
        let exact = BoundedTopKSelector::new(2, SelectionStrategy::Exact)
            .select(partitions.clone())
            .unwrap();
        let local = BoundedTopKSelector::new(2, SelectionStrategy::PartitionLocal)
            .select(partitions)
            .unwrap();
        assert_eq!(exact, local);
    }

    #[test]
    fn partition_local_merge_evicts_weaker_survivors_of_earlier_partitions() {
        let partitions = vec![
            vec![agg(1, "low1", 11), agg(1, "low2", 12)],
            vec![agg(1, "top1", 500)],
            vec![agg(1, "top2", 400)],
        ];
        let local = BoundedTopKSelector::new(2, SelectionStrategy::PartitionLocal)
            .select(partitions)
            .unwrap();
        assert_eq!(pages(&local[&day_bucket(1)]), vec!["top1", "top2"]);
    }

    #[test]
    fn exact_sums_partials_of_one_key_across_partitions() {
        let partitions = vec![
            vec![agg(1, "A", 60), agg(1, "S", 50)],
            vec![agg(1, "B", 60), agg(1, "S", 50)],
        ];
        let exact = BoundedTopKSelector::new(1, SelectionStrategy::Exact)
            .select(partitions)
            .unwrap();
        let winner = exact[&day_bucket(1)].iter().next().unwrap();
        assert_eq!((winner.entity.page_extension(), winner.views), ("S", 100));
    }

    #[test]
    fn partition_local_loses_winners_spread_over_partitions() {
        // S is second everywhere but first once its partials are summed.
        let partitions = vec![
            vec![agg(1, "A", 60), agg(1, "S", 50)],
            vec![agg(1, "B", 60), agg(1, "S", 50)],
        ];
        let exact = BoundedTopKSelector::new(1, SelectionStrategy::Exact)
            .select(partitions.clone())
            .unwrap();
        let local = BoundedTopKSelector::new(1, SelectionStrategy::PartitionLocal)
            .select(partitions)
            .unwrap();

        assert_eq!(pages(&exact[&day_bucket(1)]), vec!["S"]);
        assert_eq!(pages(&local[&day_bucket(1)]), vec!["A"]);
        assert_ne!(exact, local);
    }

    #[test]
    fn partition_local_under_counts_partially_cut_entities() {
        let partitions = vec![
            vec![agg(1, "A", 90), agg(1, "B", 80)],
            vec![agg(1, "C", 70), agg(1, "A", 10)],
        ];
        let local = BoundedTopKSelector::new(1, SelectionStrategy::PartitionLocal)
            .select(partitions)
            .unwrap();
        let set = &local[&day_bucket(1)];
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().map(|c| c.views), Some(90));
    }

    #[test]
    fn summing_partials_past_u64_is_an_invariant_violation() {
        let err = BoundedTopKSelector::new(1, SelectionStrategy::Exact)
            .select(vec![vec![agg(1, "A", u64::MAX)], vec![agg(1, "A", 1)]])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Invariant(_)));
    }

    #[test]
    fn hash_partition_keeps_every_aggregate() {
        let aggs: Vec<Aggregate> = (0..50).map(|i| agg(1, &format!("P{}", i), i)).collect();
        let parts = hash_partition(aggs, 4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.iter().map(Vec::len).sum::<usize>(), 50);
        assert_eq!(hash_partition(Vec::new(), 0).len(), 1);
    }

    #[test]
    fn strategy_parses_from_config_strings() {
        assert_eq!("exact".parse::<SelectionStrategy>(), Ok(SelectionStrategy::Exact));
        assert_eq!(
            "partition-local".parse::<SelectionStrategy>(),
            Ok(SelectionStrategy::PartitionLocal)
        );
        assert!("fastest".parse::<SelectionStrategy>().is_err());
    }
}
