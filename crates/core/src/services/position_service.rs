use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::errors::CoreError;
use crate::models::holding::{Holding, HoldingId};
use crate::models::transaction::{Transaction, TransactionId, TransactionType};

/// Id given to an entry that is being validated but not yet appended. It
/// sorts after every stored entry of the same date, which is where the
/// store will place it.
pub const PENDING_TRANSACTION_ID: TransactionId = TransactionId(i64::MAX);

/// Folds ledger entries into holding lineages.
///
/// Pure business logic: no store access, no clock. Feeding the same
/// entries always yields the same holdings.
pub struct PositionService;

impl PositionService {
    pub fn new() -> Self {
        Self
    }

    /// Reduce entries (any order) into one `Holding` per lineage, closed
    /// lineages included.
    ///
    /// Entries are folded in `(date, id)` order. Entries without a holding
    /// id (account cash, cash transfers, account-level dividends) do not
    /// touch positions and are skipped after validation.
    pub fn reduce(
        &self,
        transactions: &[Transaction],
    ) -> Result<BTreeMap<HoldingId, Holding>, CoreError> {
        let mut ordered: Vec<&Transaction> = transactions.iter().collect();
        ordered.sort_by_key(|t| (t.date, t.id));

        let mut lineages = BTreeMap::new();
        for transaction in ordered {
            self.apply(&mut lineages, transaction)?;
        }
        log::debug!(
            "Reduced {} ledger entries into {} holding lineages",
            transactions.len(),
            lineages.len()
        );
        Ok(lineages)
    }

    /// Same as `reduce`, ignoring entries dated after `as_of`.
    pub fn reduce_as_of(
        &self,
        transactions: &[Transaction],
        as_of: NaiveDate,
    ) -> Result<BTreeMap<HoldingId, Holding>, CoreError> {
        let prefix: Vec<Transaction> = transactions
            .iter()
            .filter(|t| t.date <= as_of)
            .cloned()
            .collect();
        self.reduce(&prefix)
    }

    /// Reduce `existing` with `pending` folded in at its final position.
    /// Used to reject an entry before it is appended: a back-dated sell
    /// that would oversell a later entry fails here too.
    ///
    /// A buy, reinvest or split against a lineage that is closed at the
    /// end of `existing` is rejected even when it is dated before the
    /// closing sell.
    pub fn reduce_with_pending(
        &self,
        existing: &[Transaction],
        pending: &Transaction,
    ) -> Result<BTreeMap<HoldingId, Holding>, CoreError> {
        let adds_units = matches!(
            pending.transaction_type,
            TransactionType::Buy | TransactionType::ReinvestDividend | TransactionType::Split
        );
        if let (true, Some(holding_id)) = (adds_units, pending.holding_id) {
            let current = self.reduce(existing)?;
            if current.get(&holding_id).is_some_and(|h| !h.is_open()) {
                return Err(CoreError::MalformedTransaction(format!(
                    "Holding {holding_id} is closed; {} on {} cannot reopen it",
                    pending.transaction_type, pending.date
                )));
            }
        }

        let mut all = existing.to_vec();
        all.push(pending.clone());
        self.reduce(&all)
    }

    /// Only lineages with quantity > 0.
    pub fn open_positions(&self, lineages: BTreeMap<HoldingId, Holding>) -> Vec<Holding> {
        lineages.into_values().filter(|h| h.is_open()).collect()
    }

    /// Field checks that do not depend on prior ledger state.
    pub fn validate_entry(&self, transaction: &Transaction) -> Result<(), CoreError> {
        let kind = transaction.transaction_type;
        let needs_lineage = matches!(
            kind,
            TransactionType::Buy
                | TransactionType::Sell
                | TransactionType::ReinvestDividend
                | TransactionType::Split
        );

        if needs_lineage && transaction.holding_id.is_none() {
            return Err(CoreError::MalformedTransaction(format!(
                "{kind} entry requires a holding id"
            )));
        }
        if transaction.holding_id.is_some() && transaction.investment_id.is_none() {
            return Err(CoreError::MalformedTransaction(format!(
                "{kind} entry against a holding requires an investment id"
            )));
        }
        let amount = transaction.amount().ok_or_else(|| {
            CoreError::MalformedTransaction(format!(
                "{kind} amount {} x {} overflows",
                transaction.trade_quantity, transaction.trade_price
            ))
        })?;
        let signed_price = matches!(
            kind,
            TransactionType::Cash | TransactionType::Transfer | TransactionType::Dividend
        );
        if !signed_price && transaction.trade_price < Decimal::ZERO {
            return Err(CoreError::MalformedTransaction(format!(
                "{kind} entry has negative price {}",
                transaction.trade_price
            )));
        }

        match kind {
            TransactionType::Buy
            | TransactionType::Sell
            | TransactionType::ReinvestDividend
            | TransactionType::Split => {
                if transaction.trade_quantity <= Decimal::ZERO {
                    return Err(CoreError::MalformedTransaction(format!(
                        "{kind} quantity must be positive, got {}",
                        transaction.trade_quantity
                    )));
                }
            }
            TransactionType::Transfer if transaction.holding_id.is_some() => {
                if transaction.trade_quantity <= Decimal::ZERO {
                    return Err(CoreError::MalformedTransaction(format!(
                        "Transferred quantity must be positive, got {}",
                        transaction.trade_quantity
                    )));
                }
            }
            TransactionType::Transfer | TransactionType::Cash => {
                if amount.is_zero() {
                    return Err(CoreError::MalformedTransaction(format!(
                        "{kind} entry moves no cash"
                    )));
                }
            }
            TransactionType::Dividend => {
                let amount = transaction.dividend.unwrap_or(amount);
                if amount <= Decimal::ZERO {
                    return Err(CoreError::MalformedTransaction(format!(
                        "Dividend amount must be positive, got {amount}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        lineages: &mut BTreeMap<HoldingId, Holding>,
        transaction: &Transaction,
    ) -> Result<(), CoreError> {
        self.validate_entry(transaction)?;

        let Some(holding_id) = transaction.holding_id else {
            return Ok(());
        };
        let kind = transaction.transaction_type;
        let quantity = transaction.trade_quantity;
        let price = transaction.trade_price;

        if kind == TransactionType::Buy && !lineages.contains_key(&holding_id) {
            let investment_id = transaction.investment_id.ok_or_else(|| {
                CoreError::MalformedTransaction("Buy entry requires an investment id".into())
            })?;
            lineages.insert(
                holding_id,
                Holding {
                    id: holding_id,
                    account_id: transaction.account_id,
                    investment_id,
                    purchase_price: price,
                    quantity,
                    purchase_date: transaction.date,
                    total_dividends: Decimal::ZERO,
                },
            );
            return Ok(());
        }

        let holding = lineages.get_mut(&holding_id).ok_or_else(|| {
            CoreError::MalformedTransaction(format!(
                "{kind} on {} references holding {holding_id} before any buy opened it",
                transaction.date
            ))
        })?;

        if holding.account_id != transaction.account_id
            || Some(holding.investment_id) != transaction.investment_id
        {
            return Err(CoreError::MalformedTransaction(format!(
                "{kind} entry {} does not belong to the account and investment of holding {holding_id}",
                transaction.id
            )));
        }

        match kind {
            TransactionType::Buy | TransactionType::ReinvestDividend => {
                if !holding.is_open() {
                    return Err(CoreError::MalformedTransaction(format!(
                        "Holding {holding_id} is closed; a new buy opens a new holding"
                    )));
                }
                holding.purchase_price =
                    weighted_average(holding.quantity, holding.purchase_price, quantity, price)
                        .ok_or_else(|| overflows(holding_id, transaction))?;
                holding.quantity = holding
                    .quantity
                    .checked_add(quantity)
                    .ok_or_else(|| overflows(holding_id, transaction))?;
            }
            TransactionType::Split => {
                if !holding.is_open() {
                    return Err(CoreError::MalformedTransaction(format!(
                        "Cannot split closed holding {holding_id}"
                    )));
                }
                let total_cost = holding
                    .value_at_purchase()
                    .ok_or_else(|| overflows(holding_id, transaction))?;
                let split_quantity = holding
                    .quantity
                    .checked_add(quantity)
                    .ok_or_else(|| overflows(holding_id, transaction))?;
                holding.purchase_price = total_cost
                    .checked_div(split_quantity)
                    .ok_or_else(|| overflows(holding_id, transaction))?;
                holding.quantity = split_quantity;
            }
            TransactionType::Sell | TransactionType::Transfer => {
                if quantity > holding.quantity {
                    return Err(CoreError::InsufficientQuantity {
                        holding_id,
                        requested: quantity,
                        available: holding.quantity,
                    });
                }
                holding.quantity -= quantity;
            }
            TransactionType::Dividend => {
                let amount = match transaction.dividend {
                    Some(amount) => amount,
                    None => transaction
                        .amount()
                        .ok_or_else(|| overflows(holding_id, transaction))?,
                };
                holding.total_dividends = holding
                    .total_dividends
                    .checked_add(amount.abs())
                    .ok_or_else(|| overflows(holding_id, transaction))?;
            }
            TransactionType::Cash => {}
        }
        Ok(())
    }
}

impl Default for PositionService {
    fn default() -> Self {
        Self::new()
    }
}

/// `(old_qty*old_price + added_qty*added_price) / (old_qty + added_qty)`,
/// `None` on overflow.
pub fn weighted_average(
    old_quantity: Decimal,
    old_price: Decimal,
    added_quantity: Decimal,
    added_price: Decimal,
) -> Option<Decimal> {
    let total = old_quantity.checked_add(added_quantity)?;
    if total.is_zero() {
        return Some(added_price);
    }
    old_quantity
        .checked_mul(old_price)?
        .checked_add(added_quantity.checked_mul(added_price)?)?
        .checked_div(total)
}

fn overflows(holding_id: HoldingId, transaction: &Transaction) -> CoreError {
    CoreError::MalformedTransaction(format!(
        "{} on {} overflows holding {holding_id}",
        transaction.transaction_type, transaction.date
    ))
}

