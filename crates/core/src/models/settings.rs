use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

use super::bucket::BucketId;
use super::investment::InvestmentType;
use super::report::{SortBy, SortOrder};

/// Condition selecting the holdings a bucket rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketMatcher {
    /// Investment symbol, case-insensitive
    Symbol(String),
    InvestmentType(InvestmentType),
    /// Investment sector, case-insensitive
    Sector(String),
}

/// One ordered bucket classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRuleEntry {
    pub matcher: BucketMatcher,
    pub bucket: BucketId,
}

impl BucketRuleEntry {
    pub fn new(matcher: BucketMatcher, bucket: BucketId) -> Self {
        Self { matcher, bucket }
    }
}

/// User-configurable settings, stored alongside the portfolio data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deadline for each store fetch made while computing a report.
    /// `None` disables the deadline.
    pub fetch_timeout_ms: Option<u64>,

    pub default_sort_by: SortBy,

    pub default_sort_order: SortOrder,

    /// Bucket rules, first match wins. Holdings no rule matches are
    /// unclassified.
    pub bucket_rules: Vec<BucketRuleEntry>,

    /// How many times a conflicted bucket snapshot is re-read and retried.
    pub snapshot_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: Some(5_000),
            default_sort_by: SortBy::MarketValue,
            default_sort_order: SortOrder::Desc,
            bucket_rules: Vec::new(),
            snapshot_retries: 3,
        }
    }
}

impl Settings {
    /// Parse and validate settings from JSON. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fetch_timeout_ms == Some(0) {
            return Err(CoreError::ValidationError(
                "fetch_timeout_ms must be positive (use null to disable the deadline)".into(),
            ));
        }
        for rule in &self.bucket_rules {
            let empty = match &rule.matcher {
                BucketMatcher::Symbol(s) | BucketMatcher::Sector(s) => s.trim().is_empty(),
                BucketMatcher::InvestmentType(_) => false,
            };
            if empty {
                return Err(CoreError::ValidationError(format!(
                    "Bucket rule for {:?} has an empty matcher",
                    rule.bucket
                )));
            }
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Option<std::time::Duration> {
        self.fetch_timeout_ms.map(std::time::Duration::from_millis)
    }
}
