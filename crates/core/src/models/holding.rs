use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::investment::InvestmentId;

/// Store-assigned identifier of a holding lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HoldingId(pub i64);

impl std::fmt::Display for HoldingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a holding lineage. A closed lineage never reopens; a new
/// buy of the same investment starts a new lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldingState {
    Open,
    Closed,
}

/// Current state of one lot: what the ledger says is held under a single
/// holding id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub id: HoldingId,
    pub account_id: AccountId,
    pub investment_id: InvestmentId,

    /// Cost basis per unit.
    pub purchase_price: Decimal,

    /// Units currently held, never negative.
    pub quantity: Decimal,

    /// Date of the buy that opened the lineage.
    pub purchase_date: NaiveDate,

    /// Sum of dividends booked against this holding.
    #[serde(default)]
    pub total_dividends: Decimal,
}

impl Holding {
    pub fn state(&self) -> HoldingState {
        if self.quantity > Decimal::ZERO {
            HoldingState::Open
        } else {
            HoldingState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == HoldingState::Open
    }

    /// `quantity * purchase_price`, `None` on overflow.
    pub fn value_at_purchase(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.purchase_price)
    }
}
