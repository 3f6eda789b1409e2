use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::holding::{Holding, HoldingId};
use super::investment::{Investment, InvestmentId, InvestmentType};

/// Valuation of one holding against the latest applicable quote.
///
/// Fields derived from the quote are `None` when no quote exists on or
/// before the as-of date; they are never defaulted to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub value_at_purchase: Decimal,
    pub quote_date: Option<NaiveDate>,
    pub price_at_close: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub change_in_value: Option<Decimal>,
}

/// An open holding together with its investment and valuation; the
/// common input of the report and bucket folds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuedHolding {
    pub holding: Holding,
    pub investment: Investment,
    pub valuation: Valuation,
}

/// One row of the open-holdings report. Derived on every request, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingsReportRow {
    pub holding_id: HoldingId,
    pub account_id: AccountId,
    pub investment_id: InvestmentId,
    pub symbol: String,
    pub company_name: String,
    pub quantity: Decimal,
    pub purchase_price: Decimal,
    pub price_at_close: Option<Decimal>,
    pub value_at_purchase: Decimal,
    pub market_value: Option<Decimal>,
    pub change_in_value: Option<Decimal>,
}

/// Column the holdings report is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
    MarketValue,
    ChangeInValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Open holdings grouped by (investment type, sector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSectorRow {
    pub investment_type: InvestmentType,
    pub sector: Option<String>,
    pub holdings: usize,
    pub value_at_purchase: Decimal,

    /// Sum over quoted holdings; `None` when none of the group is quoted.
    pub market_value: Option<Decimal>,
}

/// Open lots of one investment summed together, across accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentChangeRow {
    pub investment_id: InvestmentId,
    pub symbol: String,
    pub company_name: String,
    pub holdings: usize,
    pub quantity: Decimal,
    pub value_at_purchase: Decimal,
    pub quote_date: Option<NaiveDate>,
    pub market_value: Option<Decimal>,
    pub change_in_value: Option<Decimal>,
}

/// Purchase value against market value of the open holdings in one sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorSummaryRow {
    pub sector: Option<String>,
    pub holdings: usize,
    pub unquoted_holdings: usize,
    pub value_at_purchase: Decimal,

    /// Sum over quoted holdings; `None` when none of the sector is quoted.
    pub market_value: Option<Decimal>,

    /// Market value minus purchase value of the quoted holdings only.
    pub change_in_value: Option<Decimal>,

    /// Latest quote date among the sector's holdings.
    pub quote_date: Option<NaiveDate>,
}

/// Portfolio market value on one quote date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupPoint {
    pub date: NaiveDate,
    pub market_value: Decimal,
    pub value_at_purchase: Decimal,
}
