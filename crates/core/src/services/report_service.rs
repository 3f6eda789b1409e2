use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::CoreError;
use crate::models::investment::{InvestmentId, InvestmentType};
use crate::models::quote::QuoteSeries;
use crate::models::report::{
    HoldingsReportRow, InvestmentChangeRow, RollupPoint, SectorSummaryRow, SortBy, SortOrder,
    TypeSectorRow, ValuedHolding,
};
use crate::models::transaction::Transaction;
use crate::services::position_service::PositionService;
use crate::services::valuation_service::ValuationService;

/// Builds report shapes out of valued holdings. Nothing here is cached;
/// every report is recomputed from its inputs.
pub struct ReportService {
    position_service: PositionService,
    valuation_service: ValuationService,
}

impl ReportService {
    pub fn new() -> Self {
        Self {
            position_service: PositionService::new(),
            valuation_service: ValuationService::new(),
        }
    }

    /// Open holdings as report rows, sorted by `sort_by` in `order`.
    ///
    /// Ties (and rows whose sort value is equal) are ordered by symbol
    /// ascending, then holding id. Rows without a quote always come last,
    /// whatever the order.
    pub fn open_holdings(
        &self,
        holdings: &[ValuedHolding],
        sort_by: SortBy,
        order: SortOrder,
    ) -> Vec<HoldingsReportRow> {
        let mut rows: Vec<HoldingsReportRow> = holdings
            .iter()
            .filter(|v| v.holding.is_open())
            .map(|v| HoldingsReportRow {
                holding_id: v.holding.id,
                account_id: v.holding.account_id,
                investment_id: v.investment.id,
                symbol: v.investment.symbol.clone(),
                company_name: v.investment.company_name.clone(),
                quantity: v.holding.quantity,
                purchase_price: v.holding.purchase_price,
                price_at_close: v.valuation.price_at_close,
                value_at_purchase: v.valuation.value_at_purchase,
                market_value: v.valuation.market_value,
                change_in_value: v.valuation.change_in_value,
            })
            .collect();

        rows.sort_by(|a, b| compare_rows(a, b, sort_by, order));
        rows
    }

    /// Open holdings grouped by (investment type, sector), in type then
    /// sector order.
    pub fn type_sector(&self, holdings: &[ValuedHolding]) -> Result<Vec<TypeSectorRow>, CoreError> {
        let mut groups: BTreeMap<(InvestmentType, Option<String>), TypeSectorRow> =
            BTreeMap::new();

        for valued in holdings.iter().filter(|v| v.holding.is_open()) {
            let key = (
                valued.investment.investment_type,
                valued.investment.sector.clone(),
            );
            let row = groups.entry(key.clone()).or_insert_with(|| TypeSectorRow {
                investment_type: key.0,
                sector: key.1,
                holdings: 0,
                value_at_purchase: Decimal::ZERO,
                market_value: None,
            });
            let what = || {
                format!(
                    "{} / {} group total",
                    valued.investment.investment_type,
                    valued.investment.sector.as_deref().unwrap_or("no sector")
                )
            };
            row.holdings += 1;
            row.value_at_purchase =
                add(row.value_at_purchase, valued.valuation.value_at_purchase, what)?;
            if let Some(value) = valued.valuation.market_value {
                let total = row.market_value.unwrap_or(Decimal::ZERO);
                row.market_value = Some(add(total, value, what)?);
            }
        }

        Ok(groups.into_values().collect())
    }

    /// Open lots summed per investment, ordered by symbol. All lots of an
    /// investment share its quote, so the market fields are either all
    /// known or all `None`.
    pub fn investment_changes(
        &self,
        holdings: &[ValuedHolding],
    ) -> Result<Vec<InvestmentChangeRow>, CoreError> {
        let mut rows: BTreeMap<(String, InvestmentId), InvestmentChangeRow> = BTreeMap::new();

        for valued in holdings.iter().filter(|v| v.holding.is_open()) {
            let investment = &valued.investment;
            let row = rows
                .entry((investment.symbol.clone(), investment.id))
                .or_insert_with(|| InvestmentChangeRow {
                    investment_id: investment.id,
                    symbol: investment.symbol.clone(),
                    company_name: investment.company_name.clone(),
                    holdings: 0,
                    quantity: Decimal::ZERO,
                    value_at_purchase: Decimal::ZERO,
                    quote_date: valued.valuation.quote_date,
                    market_value: valued.valuation.market_value.map(|_| Decimal::ZERO),
                    change_in_value: valued.valuation.change_in_value.map(|_| Decimal::ZERO),
                });
            let what = || format!("change report total of {}", investment.symbol);
            row.holdings += 1;
            row.quantity = add(row.quantity, valued.holding.quantity, what)?;
            row.value_at_purchase =
                add(row.value_at_purchase, valued.valuation.value_at_purchase, what)?;
            row.market_value = add_known(row.market_value, valued.valuation.market_value, what)?;
            row.change_in_value =
                add_known(row.change_in_value, valued.valuation.change_in_value, what)?;
        }

        Ok(rows.into_values().collect())
    }

    /// Open holdings summed per sector, ordered by sector with the
    /// sector-less group first.
    pub fn sector_summary(
        &self,
        holdings: &[ValuedHolding],
    ) -> Result<Vec<SectorSummaryRow>, CoreError> {
        let mut groups: BTreeMap<Option<String>, SectorSummaryRow> = BTreeMap::new();

        for valued in holdings.iter().filter(|v| v.holding.is_open()) {
            let sector = valued.investment.sector.clone();
            let row = groups
                .entry(sector.clone())
                .or_insert_with(|| SectorSummaryRow {
                    sector,
                    holdings: 0,
                    unquoted_holdings: 0,
                    value_at_purchase: Decimal::ZERO,
                    market_value: None,
                    change_in_value: None,
                    quote_date: None,
                });
            let what = || {
                format!(
                    "sector total of {}",
                    valued.investment.sector.as_deref().unwrap_or("no sector")
                )
            };
            row.holdings += 1;
            row.value_at_purchase =
                add(row.value_at_purchase, valued.valuation.value_at_purchase, what)?;
            match (valued.valuation.market_value, valued.valuation.change_in_value) {
                (Some(market_value), Some(change)) => {
                    row.market_value =
                        Some(add(row.market_value.unwrap_or(Decimal::ZERO), market_value, what)?);
                    row.change_in_value =
                        Some(add(row.change_in_value.unwrap_or(Decimal::ZERO), change, what)?);
                    row.quote_date = row.quote_date.max(valued.valuation.quote_date);
                }
                _ => row.unquoted_holdings += 1,
            }
        }

        Ok(groups.into_values().collect())
    }

    /// Portfolio value on every quote date in `[from, to]`.
    ///
    /// Positions are re-reduced from the ledger prefix up to each date, so
    /// buys and sells inside the range show up on the day they happen.
    /// Holdings without a quote on or before a date add to
    /// `value_at_purchase` only.
    pub fn rollup(
        &self,
        transactions: &[Transaction],
        quotes: &BTreeMap<InvestmentId, QuoteSeries>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RollupPoint>, CoreError> {
        self.rollup_for(transactions, quotes, None, from, to)
    }

    /// Same as `rollup`; with `investment` set, only positions in that
    /// investment are valued and only its quote dates produce points.
    pub fn rollup_for(
        &self,
        transactions: &[Transaction],
        quotes: &BTreeMap<InvestmentId, QuoteSeries>,
        investment: Option<InvestmentId>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RollupPoint>, CoreError> {
        if from > to {
            return Err(CoreError::ValidationError(format!(
                "Rollup range starts after it ends ({from} > {to})"
            )));
        }
        let included = |id: &InvestmentId| investment.map_or(true, |only| only == *id);

        let dates: BTreeSet<NaiveDate> = quotes
            .iter()
            .filter(|(id, _)| included(*id))
            .flat_map(|(_, series)| series.range(from, to).iter().map(|q| q.date))
            .collect();

        let mut points = Vec::with_capacity(dates.len());
        for date in dates {
            let lineages = self.position_service.reduce_as_of(transactions, date)?;
            let what = || format!("portfolio rollup on {date}");
            let mut market_value = Decimal::ZERO;
            let mut value_at_purchase = Decimal::ZERO;
            for holding in self
                .position_service
                .open_positions(lineages)
                .into_iter()
                .filter(|h| included(&h.investment_id))
            {
                let valuation = self.valuation_service.value_as_of(
                    &holding,
                    quotes.get(&holding.investment_id),
                    date,
                )?;
                value_at_purchase = add(value_at_purchase, valuation.value_at_purchase, what)?;
                market_value = add(
                    market_value,
                    valuation.market_value.unwrap_or(Decimal::ZERO),
                    what,
                )?;
            }
            points.push(RollupPoint {
                date,
                market_value,
                value_at_purchase,
            });
        }

        log::debug!("Rollup {from}..={to}: {} points", points.len());
        Ok(points)
    }
}

impl Default for ReportService {
    fn default() -> Self {
        Self::new()
    }
}

fn add(total: Decimal, value: Decimal, what: impl Fn() -> String) -> Result<Decimal, CoreError> {
    total
        .checked_add(value)
        .ok_or_else(|| CoreError::overflow(what()))
}

fn add_known(
    total: Option<Decimal>,
    value: Option<Decimal>,
    what: impl Fn() -> String,
) -> Result<Option<Decimal>, CoreError> {
    match (total, value) {
        (Some(total), Some(value)) => add(total, value, what).map(Some),
        _ => Ok(None),
    }
}

fn compare_rows(
    a: &HoldingsReportRow,
    b: &HoldingsReportRow,
    sort_by: SortBy,
    order: SortOrder,
) -> Ordering {
    let key = |row: &HoldingsReportRow| match sort_by {
        SortBy::MarketValue => row.market_value,
        SortBy::ChangeInValue => row.change_in_value,
    };

    let by_value = match (key(a), key(b)) {
        (Some(x), Some(y)) => match order {
            SortOrder::Asc => x.cmp(&y),
            SortOrder::Desc => y.cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_value
        .then_with(|| a.symbol.cmp(&b.symbol))
        .then_with(|| a.holding_id.cmp(&b.holding_id))
}

