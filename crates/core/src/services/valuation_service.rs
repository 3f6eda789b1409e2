use chrono::NaiveDate;

use crate::errors::CoreError;
use crate::models::holding::Holding;
use crate::models::quote::{Quote, QuoteSeries};
use crate::models::report::Valuation;

/// Values holdings against quotes.
pub struct ValuationService;

impl ValuationService {
    pub fn new() -> Self {
        Self
    }

    /// Value `holding` at the close of `quote`. Without a quote only the
    /// purchase value is known; the market fields stay `None`.
    pub fn value(&self, holding: &Holding, quote: Option<&Quote>) -> Result<Valuation, CoreError> {
        let overflow = |what: &str| CoreError::overflow(format!("{what} of holding {}", holding.id));
        let value_at_purchase = holding
            .value_at_purchase()
            .ok_or_else(|| overflow("value at purchase"))?;
        let market_value = quote
            .map(|q| holding.quantity.checked_mul(q.close).ok_or_else(|| overflow("market value")))
            .transpose()?;
        let change_in_value = market_value
            .map(|mv| mv.checked_sub(value_at_purchase).ok_or_else(|| overflow("change in value")))
            .transpose()?;
        Ok(Valuation {
            value_at_purchase,
            quote_date: quote.map(|q| q.date),
            price_at_close: quote.map(|q| q.close),
            market_value,
            change_in_value,
        })
    }

    /// Value against the latest quote of `series` dated on or before `as_of`.
    pub fn value_as_of(
        &self,
        holding: &Holding,
        series: Option<&QuoteSeries>,
        as_of: NaiveDate,
    ) -> Result<Valuation, CoreError> {
        self.value(holding, series.and_then(|s| s.latest_on_or_before(as_of)))
    }
}

impl Default for ValuationService {
    fn default() -> Self {
        Self::new()
    }
}
