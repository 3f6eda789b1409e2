use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::investment::InvestmentId;

/// One daily price point for an investment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub investment_id: InvestmentId,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub price_change: Option<Decimal>,
    #[serde(default)]
    pub week52_high: Option<Decimal>,
    #[serde(default)]
    pub week52_low: Option<Decimal>,
}

impl Quote {
    /// A quote where open/high/low all equal the close.
    pub fn close_only(investment_id: InvestmentId, date: NaiveDate, close: Decimal) -> Self {
        Self {
            investment_id,
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0,
            price_change: None,
            week52_high: None,
            week52_low: None,
        }
    }
}

/// Date-indexed quotes for a single investment, kept sorted by date with
/// at most one quote per date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSeries {
    quotes: Vec<Quote>,
}

impl QuoteSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from quotes in any order. Later duplicates of a
    /// date replace earlier ones.
    pub fn from_quotes(quotes: impl IntoIterator<Item = Quote>) -> Self {
        let mut series = Self::new();
        for quote in quotes {
            series.upsert(quote);
        }
        series
    }

    /// Insert a quote, replacing any quote already stored for its date.
    /// Returns the replaced quote, if any.
    pub fn upsert(&mut self, quote: Quote) -> Option<Quote> {
        match self.quotes.binary_search_by_key(&quote.date, |q| q.date) {
            Ok(idx) => Some(std::mem::replace(&mut self.quotes[idx], quote)),
            Err(idx) => {
                self.quotes.insert(idx, quote);
                None
            }
        }
    }

    /// Exact-date lookup.
    pub fn get(&self, date: NaiveDate) -> Option<&Quote> {
        self.quotes
            .binary_search_by_key(&date, |q| q.date)
            .ok()
            .map(|idx| &self.quotes[idx])
    }

    /// Most recent quote whose date is on or before `as_of`.
    pub fn latest_on_or_before(&self, as_of: NaiveDate) -> Option<&Quote> {
        // partition_point gives the first index with date > as_of
        let end = self.quotes.partition_point(|q| q.date <= as_of);
        end.checked_sub(1).map(|idx| &self.quotes[idx])
    }

    /// Quotes with `from <= date <= to`, oldest first.
    pub fn range(&self, from: NaiveDate, to: NaiveDate) -> &[Quote] {
        let start = self.quotes.partition_point(|q| q.date < from);
        let end = self.quotes.partition_point(|q| q.date <= to);
        if start >= end {
            &[]
        } else {
            &self.quotes[start..end]
        }
    }

    pub fn latest(&self) -> Option<&Quote> {
        self.quotes.last()
    }

    pub fn as_slice(&self) -> &[Quote] {
        &self.quotes
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
