use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{ENGLISH_DOMAIN_PREFIX, EXPECTED_FIELD_COUNT, HYPHEN_ONLY_EXTENSION};
use crate::domain::{ParsedRecord, SourceContext};

/// Why a raw line was not turned into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotEnglishDomain,
    HyphenOnlyExtension,
    ContainsTab,
    WrongFieldCount,
    NonIntegerViewCount,
}

impl RejectionReason {
    /// All reasons, in the order the checks run.
    pub const ALL: [RejectionReason; 5] = [
        RejectionReason::NotEnglishDomain,
        RejectionReason::HyphenOnlyExtension,
        RejectionReason::ContainsTab,
        RejectionReason::WrongFieldCount,
        RejectionReason::NonIntegerViewCount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::NotEnglishDomain => "not_english_domain",
            RejectionReason::HyphenOnlyExtension => "hyphen_only_extension",
            RejectionReason::ContainsTab => "contains_tab",
            RejectionReason::WrongFieldCount => "wrong_field_count",
            RejectionReason::NonIntegerViewCount => "non_integer_view_count",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid(ParsedRecord),
    Rejected(RejectionReason),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }
}

/// Turns a raw line into a typed record or a single rejection reason.
///
/// Implementations must be pure: the same `(line, ctx)` always yields the same
/// outcome. Counting rejections is the caller's job (see [`RejectionTally`]).
pub trait RecordValidator: Send + Sync {
    fn validate(&self, line: &str, ctx: &SourceContext) -> ValidationOutcome;
}

/// Validator for English Wikipedia hourly page-view lines:
/// `<domain> <extension> <views> <bytes>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageViewValidator;

impl PageViewValidator {
    pub fn new() -> Self {
        Self
    }
}

impl RecordValidator for PageViewValidator {
    fn validate(&self, line: &str, _ctx: &SourceContext) -> ValidationOutcome {
        use RejectionReason::*;

        // First failing check wins; the order is part of the contract.
        let Some(after_domain) = line.strip_prefix(ENGLISH_DOMAIN_PREFIX) else {
            return ValidationOutcome::Rejected(NotEnglishDomain);
        };
        if after_domain.starts_with(HYPHEN_ONLY_EXTENSION) {
            return ValidationOutcome::Rejected(HyphenOnlyExtension);
        }
        if line.contains('\t') {
            return ValidationOutcome::Rejected(ContainsTab);
        }

        let fields = split_fields(line);
        if fields.len() != EXPECTED_FIELD_COUNT {
            return ValidationOutcome::Rejected(WrongFieldCount);
        }

        let views = fields[2];
        if views.is_empty() || !views.bytes().all(|b| b.is_ascii_digit()) {
            return ValidationOutcome::Rejected(NonIntegerViewCount);
        }
        let Ok(view_count) = views.parse::<u32>() else {
            return ValidationOutcome::Rejected(NonIntegerViewCount);
        };

        ValidationOutcome::Valid(ParsedRecord {
            domain_code: fields[0].to_string(),
            page_extension: fields[1].to_string(),
            view_count,
            response_bytes: fields[3].parse().unwrap_or(0),
        })
    }
}

/// Single-space tokenisation with trailing empty tokens dropped.
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields: Vec<&str> = line.split(' ').collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// Per-reason rejection counts. Tallies from independent partitions merge by
/// addition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionTally {
    pub accepted: u64,
    pub rejected: BTreeMap<RejectionReason, u64>,
}

impl RejectionTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, outcome: &ValidationOutcome) {
        match outcome {
            ValidationOutcome::Valid(_) => self.accepted += 1,
            ValidationOutcome::Rejected(reason) => *self.rejected.entry(*reason).or_insert(0) += 1,
        }
    }

    pub fn count(&self, reason: RejectionReason) -> u64 {
        self.rejected.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }

    pub fn total_seen(&self) -> u64 {
        self.accepted + self.total_rejected()
    }

    pub fn merge(mut self, other: RejectionTally) -> RejectionTally {
        self.accepted += other.accepted;
        for (reason, n) in other.rejected {
            *self.rejected.entry(reason).or_insert(0) += n;
        }
        self
    }
}
