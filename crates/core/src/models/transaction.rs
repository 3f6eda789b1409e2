use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::holding::HoldingId;
use super::investment::InvestmentId;

/// Store-assigned identifier of a ledger entry. Ids increase in insertion
/// order, so `(date, id)` is a deterministic total order over the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub i64);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Opens a holding lineage
    Buy,
    /// Reduces a holding lineage
    Sell,
    /// Cash income from an investment
    Dividend,
    /// Signed cash movement on an account (deposits positive)
    Cash,
    /// One leg of a cash move between accounts, or shares leaving a holding
    Transfer,
    /// Dividend proceeds used to buy more units of the same holding
    #[serde(rename = "Reinvest_Dividend", alias = "ReinvestDividend")]
    ReinvestDividend,
    /// Additional units from a stock split, total cost unchanged
    Split,
}

impl TransactionType {
    /// Whether the cash reconciler folds this entry type.
    pub fn is_cash_type(&self) -> bool {
        matches!(
            self,
            TransactionType::Cash
                | TransactionType::Dividend
                | TransactionType::Transfer
                | TransactionType::ReinvestDividend
        )
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "Buy"),
            TransactionType::Sell => write!(f, "Sell"),
            TransactionType::Dividend => write!(f, "Dividend"),
            TransactionType::Cash => write!(f, "Cash"),
            TransactionType::Transfer => write!(f, "Transfer"),
            TransactionType::ReinvestDividend => write!(f, "Reinvest Dividend"),
            TransactionType::Split => write!(f, "Split"),
        }
    }
}

/// A persisted, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,

    /// None for account-level cash entries.
    #[serde(default)]
    pub investment_id: Option<InvestmentId>,

    /// None for account-level cash entries.
    #[serde(default)]
    pub holding_id: Option<HoldingId>,

    pub transaction_type: TransactionType,
    pub date: NaiveDate,
    pub trade_price: Decimal,
    pub trade_quantity: Decimal,

    #[serde(default)]
    pub dividend: Option<Decimal>,

    /// Links a trade to the cash entry it generated (or a transfer leg to
    /// its counterpart).
    #[serde(default)]
    pub associated_cash_transaction_id: Option<TransactionId>,
}

impl Transaction {
    /// `trade_quantity * trade_price`, signs included. `None` when the
    /// product does not fit a `Decimal`.
    pub fn amount(&self) -> Option<Decimal> {
        self.trade_quantity.checked_mul(self.trade_price)
    }
}

/// A validated entry waiting for the store to assign its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub investment_id: Option<InvestmentId>,
    pub holding_id: Option<HoldingId>,
    pub transaction_type: TransactionType,
    pub date: NaiveDate,
    pub trade_price: Decimal,
    pub trade_quantity: Decimal,
    pub dividend: Option<Decimal>,
    pub associated_cash_transaction_id: Option<TransactionId>,
}

impl NewTransaction {
    pub fn new(
        account_id: AccountId,
        transaction_type: TransactionType,
        date: NaiveDate,
        trade_quantity: Decimal,
        trade_price: Decimal,
    ) -> Self {
        Self {
            account_id,
            investment_id: None,
            holding_id: None,
            transaction_type,
            date,
            trade_price,
            trade_quantity,
            dividend: None,
            associated_cash_transaction_id: None,
        }
    }

    pub fn for_investment(mut self, investment_id: InvestmentId) -> Self {
        self.investment_id = Some(investment_id);
        self
    }

    pub fn for_holding(mut self, holding_id: HoldingId) -> Self {
        self.holding_id = Some(holding_id);
        self
    }

    pub fn with_dividend(mut self, dividend: Decimal) -> Self {
        self.dividend = Some(dividend);
        self
    }

    pub fn associated_with(mut self, id: TransactionId) -> Self {
        self.associated_cash_transaction_id = Some(id);
        self
    }

    pub(crate) fn into_transaction(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            account_id: self.account_id,
            investment_id: self.investment_id,
            holding_id: self.holding_id,
            transaction_type: self.transaction_type,
            date: self.date,
            trade_price: self.trade_price,
            trade_quantity: self.trade_quantity,
            dividend: self.dividend,
            associated_cash_transaction_id: self.associated_cash_transaction_id,
        }
    }
}

/// Loosely-typed transaction input, as it arrives from a form or JSON body.
/// Every field is optional; `PortfolioTracker::record_transaction` rejects
/// drafts missing what their type requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDraft {
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
    #[serde(default)]
    pub account_id: Option<AccountId>,
    /// Credited account of a cash transfer.
    #[serde(default)]
    pub to_account_id: Option<AccountId>,
    #[serde(default)]
    pub investment_id: Option<InvestmentId>,
    #[serde(default)]
    pub holding_id: Option<HoldingId>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub trade_price: Option<Decimal>,
    #[serde(default)]
    pub trade_quantity: Option<Decimal>,
    #[serde(default)]
    pub dividend: Option<Decimal>,
}

/// Optional filters for ledger queries; `None` matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub account_id: Option<AccountId>,
    pub investment_id: Option<InvestmentId>,
    pub holding_id: Option<HoldingId>,
}

impl TransactionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn account(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            ..Self::default()
        }
    }

    pub fn holding(holding_id: HoldingId) -> Self {
        Self {
            holding_id: Some(holding_id),
            ..Self::default()
        }
    }

    pub fn position(account_id: AccountId, investment_id: InvestmentId) -> Self {
        Self {
            account_id: Some(account_id),
            investment_id: Some(investment_id),
            holding_id: None,
        }
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.account_id.map_or(true, |id| transaction.account_id == id)
            && self
                .investment_id
                .map_or(true, |id| transaction.investment_id == Some(id))
            && self
                .holding_id
                .map_or(true, |id| transaction.holding_id == Some(id))
    }
}
