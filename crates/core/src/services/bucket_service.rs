use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::errors::CoreError;
use crate::models::bucket::{BucketId, BucketSummary, HoldingBucket};
use crate::models::holding::Holding;
use crate::models::investment::Investment;
use crate::models::report::ValuedHolding;
use crate::models::settings::{BucketMatcher, BucketRuleEntry, Settings};

/// Assigns a holding to exactly one bucket. Implementations must be pure:
/// the same holding and investment always land in the same bucket.
pub trait BucketRule: Send + Sync {
    fn classify(&self, holding: &Holding, investment: &Investment) -> BucketId;
}

impl<F> BucketRule for F
where
    F: Fn(&Holding, &Investment) -> BucketId + Send + Sync,
{
    fn classify(&self, holding: &Holding, investment: &Investment) -> BucketId {
        self(holding, investment)
    }
}

/// Rule built from `Settings::bucket_rules`: the first matching entry
/// decides, no match means `Unclassified`.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredBucketRule {
    rules: Vec<BucketRuleEntry>,
}

impl ConfiguredBucketRule {
    pub fn new(rules: Vec<BucketRuleEntry>) -> Self {
        Self { rules }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.bucket_rules.clone())
    }

    pub fn rules(&self) -> &[BucketRuleEntry] {
        &self.rules
    }
}

impl BucketRule for ConfiguredBucketRule {
    fn classify(&self, _holding: &Holding, investment: &Investment) -> BucketId {
        self.rules
            .iter()
            .find(|rule| matches(&rule.matcher, investment))
            .map_or(BucketId::Unclassified, |rule| rule.bucket)
    }
}

fn matches(matcher: &BucketMatcher, investment: &Investment) -> bool {
    match matcher {
        BucketMatcher::Symbol(symbol) => investment.symbol.eq_ignore_ascii_case(symbol.trim()),
        BucketMatcher::InvestmentType(kind) => investment.investment_type == *kind,
        BucketMatcher::Sector(sector) => investment
            .sector
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case(sector.trim())),
    }
}

/// Classifies open holdings and sums them per bucket.
pub struct BucketService;

impl BucketService {
    pub fn new() -> Self {
        Self
    }

    /// Bucket totals for `holdings` valued as of `as_of`.
    ///
    /// Every bucket appears in the result, empty ones with zero totals.
    /// `amount` sums market values of quoted holdings; holdings without a
    /// quote still count toward `amount_at_purchase`.
    pub fn summarize(
        &self,
        as_of: NaiveDate,
        holdings: &[ValuedHolding],
        rule: &dyn BucketRule,
    ) -> Result<BucketSummary, CoreError> {
        let mut buckets: BTreeMap<BucketId, HoldingBucket> = BucketId::ALL
            .iter()
            .map(|id| (*id, HoldingBucket::empty(*id)))
            .collect();

        for valued in holdings.iter().filter(|v| v.holding.is_open()) {
            let id = rule.classify(&valued.holding, &valued.investment);
            let bucket = buckets
                .entry(id)
                .or_insert_with(|| HoldingBucket::empty(id));
            let overflow = || CoreError::overflow(format!("total of bucket {}", id.description()));
            bucket.holdings += 1;
            bucket.amount_at_purchase = bucket
                .amount_at_purchase
                .checked_add(valued.valuation.value_at_purchase)
                .ok_or_else(overflow)?;
            match valued.valuation.market_value {
                Some(value) => {
                    bucket.amount = bucket.amount.checked_add(value).ok_or_else(overflow)?;
                }
                None => bucket.unquoted_holdings += 1,
            }
        }

        log::debug!(
            "Classified {} holdings into buckets as of {}",
            holdings.len(),
            as_of
        );
        Ok(BucketSummary {
            as_of_date: as_of,
            buckets,
        })
    }
}

impl Default for BucketService {
    fn default() -> Self {
        Self::new()
    }
}

