use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::constants::WIKI_URL_PREFIX;
use crate::domain::{Bucket, EntityId, Granularity};
use crate::pipeline::processing::aggregate::Totals;
use crate::pipeline::processing::topk::BoundedSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: u32,
    pub page_id: EntityId,
    pub url: String,
    pub topic: String,
    pub views: u64,
}

impl RankedEntry {
    fn new(rank: u32, page_id: EntityId, views: u64) -> Self {
        let extension = page_id.page_extension();
        let url = format!("{}{}", WIKI_URL_PREFIX, extension);
        let topic = extension.replace('_', " ");
        Self {
            rank,
            page_id,
            url,
            topic,
            views,
        }
    }
}

/// One ranked interval, serialized as
/// `{"interval": ..., "topPages": [{"rank", "pageId", "url", "topic", "views"}, ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDocument {
    pub interval: String,
    pub top_pages: Vec<RankedEntry>,
}

impl RankedDocument {
    pub fn entities(&self) -> impl Iterator<Item = &EntityId> + '_ {
        self.top_pages.iter().map(|e| &e.page_id)
    }
}

pub struct RankSerializer;

impl RankSerializer {
    /// Order by views descending, entity ascending on ties, and assign ranks
    /// 1, 2, 3, ... with no gaps; equal views still get successive ranks.
    pub fn rank(bucket: &Bucket, set: BoundedSet) -> RankedDocument {
        let mut winners = set.into_sorted_vec();
        winners.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.entity.cmp(&b.entity)));

        let top_pages = winners
            .into_iter()
            .zip(1u32..)
            .map(|(candidate, rank)| RankedEntry::new(rank, candidate.entity, candidate.views))
            .collect();

        RankedDocument {
            interval: bucket.label(),
            top_pages,
        }
    }

    pub fn rank_all(sets: BTreeMap<Bucket, BoundedSet>) -> Vec<RankedDocument> {
        sets.into_iter()
            .map(|(bucket, set)| Self::rank(&bucket, set))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyViews {
    pub day: String,
    pub views: u64,
}

/// Day-by-day views of one page that made it into some ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageHistoryDocument {
    pub page_id: EntityId,
    pub daily_views: Vec<DailyViews>,
}

/// Histories for `pages`, built from day totals and ordered by page id.
/// Pages with no day total are skipped.
pub fn page_histories(daily: &Totals, pages: &BTreeSet<EntityId>) -> Vec<PageHistoryDocument> {
    let mut by_page: BTreeMap<&EntityId, BTreeMap<Bucket, u64>> = BTreeMap::new();
    for (key, views) in daily.iter() {
        if key.granularity() == Granularity::Day && pages.contains(&key.entity) {
            by_page.entry(&key.entity).or_default().insert(key.bucket, views);
        }
    }

    by_page
        .into_iter()
        .map(|(page, days)| PageHistoryDocument {
            page_id: page.clone(),
            daily_views: days
                .into_iter()
                .map(|(bucket, views)| DailyViews {
                    day: bucket.label(),
                    views,
                })
                .collect(),
        })
        .collect()
}
