// Pipeline processing: validation, temporal rollup, bounded top-K and ranking

pub mod aggregate;
pub mod rank;
pub mod temporal;
pub mod topk;
pub mod validate;

pub use aggregate::{aggregate, IntervalAggregator, Totals};
pub use rank::{PageHistoryDocument, RankSerializer, RankedDocument, RankedEntry};
pub use topk::{BoundedSet, BoundedTopKSelector, Candidate, SelectionStrategy};
pub use validate::{PageViewValidator, RecordValidator, RejectionReason, RejectionTally, ValidationOutcome};
