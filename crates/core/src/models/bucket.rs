use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reporting bucket of the bucket strategy (time horizon tiers).
///
/// `Unclassified` is an ordinary variant: holdings no rule matches land
/// here instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BucketId {
    Bucket1,
    Bucket2,
    Bucket3,
    Unclassified,
}

impl BucketId {
    pub const ALL: [BucketId; 4] = [
        BucketId::Bucket1,
        BucketId::Bucket2,
        BucketId::Bucket3,
        BucketId::Unclassified,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            BucketId::Bucket1 => "0 - 3 years",
            BucketId::Bucket2 => "3 - 10 years",
            BucketId::Bucket3 => "Beyond 10 years",
            BucketId::Unclassified => "Excluded",
        }
    }

    /// Stable ordinal used by external representations (99 = unclassified).
    pub fn ordinal(&self) -> u8 {
        match self {
            BucketId::Bucket1 => 0,
            BucketId::Bucket2 => 1,
            BucketId::Bucket3 => 2,
            BucketId::Unclassified => 99,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => BucketId::Bucket1,
            1 => BucketId::Bucket2,
            2 => BucketId::Bucket3,
            _ => BucketId::Unclassified,
        }
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Totals of the open holdings classified into one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingBucket {
    pub bucket: BucketId,

    /// Current market value of the quoted holdings in the bucket.
    pub amount: Decimal,

    /// Purchase value of all holdings in the bucket.
    pub amount_at_purchase: Decimal,

    /// Number of open holdings in the bucket.
    pub holdings: usize,

    /// Holdings counted in `amount_at_purchase` but lacking a quote, so
    /// missing from `amount`.
    pub unquoted_holdings: usize,
}

impl HoldingBucket {
    pub fn empty(bucket: BucketId) -> Self {
        Self {
            bucket,
            amount: Decimal::ZERO,
            amount_at_purchase: Decimal::ZERO,
            holdings: 0,
            unquoted_holdings: 0,
        }
    }
}

/// Bucket totals at a point in time. Every bucket is present, empty ones
/// with zero totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub as_of_date: NaiveDate,
    pub buckets: BTreeMap<BucketId, HoldingBucket>,
}

impl BucketSummary {
    pub fn get(&self, bucket: BucketId) -> Option<&HoldingBucket> {
        self.buckets.get(&bucket)
    }

    /// Market value of a bucket; zero when the bucket is absent.
    pub fn amount(&self, bucket: BucketId) -> Decimal {
        self.get(bucket).map_or(Decimal::ZERO, |b| b.amount)
    }

    /// Purchase value of a bucket; zero when the bucket is absent.
    pub fn amount_at_purchase(&self, bucket: BucketId) -> Decimal {
        self.get(bucket).map_or(Decimal::ZERO, |b| b.amount_at_purchase)
    }

    /// Same totals keyed by bucket description.
    pub fn by_description(&self) -> BTreeMap<&'static str, &HoldingBucket> {
        self.buckets
            .iter()
            .map(|(id, bucket)| (id.description(), bucket))
            .collect()
    }

    /// Market value over all buckets, `None` on overflow.
    pub fn total_amount(&self) -> Option<Decimal> {
        self.buckets
            .values()
            .try_fold(Decimal::ZERO, |sum, b| sum.checked_add(b.amount))
    }

    pub fn total_amount_at_purchase(&self) -> Option<Decimal> {
        self.buckets
            .values()
            .try_fold(Decimal::ZERO, |sum, b| sum.checked_add(b.amount_at_purchase))
    }
}

/// A persisted, dated snapshot of bucket market values. At most one exists
/// per summation date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummation {
    pub summation_date: NaiveDate,
    pub bucket1_total: Decimal,
    pub bucket2_total: Decimal,
    pub bucket3_total: Decimal,
    pub excluded_total: Decimal,

    /// Bumped on every overwrite; used for optimistic concurrency.
    #[serde(default)]
    pub version: u64,
}

impl BucketSummation {
    pub fn from_summary(summary: &BucketSummary) -> Self {
        Self {
            summation_date: summary.as_of_date,
            bucket1_total: summary.amount(BucketId::Bucket1),
            bucket2_total: summary.amount(BucketId::Bucket2),
            bucket3_total: summary.amount(BucketId::Bucket3),
            excluded_total: summary.amount(BucketId::Unclassified),
            version: 0,
        }
    }

    pub fn total(&self, bucket: BucketId) -> Decimal {
        match bucket {
            BucketId::Bucket1 => self.bucket1_total,
            BucketId::Bucket2 => self.bucket2_total,
            BucketId::Bucket3 => self.bucket3_total,
            BucketId::Unclassified => self.excluded_total,
        }
    }
}
