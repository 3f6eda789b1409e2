use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::errors::CoreError;
use crate::models::account::AccountId;
use crate::models::transaction::{Transaction, TransactionId, TransactionType};

/// One step of an account's running cash balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashMovement {
    pub transaction_id: TransactionId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub balance: Decimal,
}

/// Folds cash-type ledger entries into account cash balances.
///
/// The balance is never stored as truth; callers recompute it from the
/// ledger whenever an account is read.
pub struct CashService;

impl CashService {
    pub fn new() -> Self {
        Self
    }

    /// Cash effect of a single entry.
    ///
    /// - Cash: `quantity * price` as stored (withdrawals are negative)
    /// - Dividend: the dividend field, else `quantity * price`, always positive
    /// - Transfer: the signed leg amount; share transfers move no cash
    /// - Reinvest dividend: the proceeds leave again, `-(quantity * price)`
    pub fn signed_amount(&self, transaction: &Transaction) -> Result<Decimal, CoreError> {
        let amount = || {
            transaction
                .amount()
                .ok_or_else(|| CoreError::overflow(format!("amount of entry {}", transaction.id)))
        };
        Ok(match transaction.transaction_type {
            TransactionType::Cash => amount()?,
            TransactionType::Dividend => match transaction.dividend {
                Some(dividend) => dividend.abs(),
                None => amount()?.abs(),
            },
            TransactionType::Transfer if transaction.holding_id.is_none() => amount()?,
            TransactionType::ReinvestDividend => -amount()?.abs(),
            _ => Decimal::ZERO,
        })
    }

    /// Cash on `account_id`. Entries of other accounts are ignored, so the
    /// whole ledger can be passed in.
    pub fn balance(
        &self,
        account_id: AccountId,
        transactions: &[Transaction],
    ) -> Result<Decimal, CoreError> {
        transactions
            .iter()
            .filter(|t| t.account_id == account_id && t.transaction_type.is_cash_type())
            .try_fold(Decimal::ZERO, |balance, t| {
                balance.checked_add(self.signed_amount(t)?).ok_or_else(|| {
                    CoreError::overflow(format!("cash balance of account {account_id}"))
                })
            })
    }

    /// Balance after each cash entry of the account, in `(date, id)` order.
    pub fn running_balance(
        &self,
        account_id: AccountId,
        transactions: &[Transaction],
    ) -> Result<Vec<CashMovement>, CoreError> {
        let mut entries: Vec<&Transaction> = transactions
            .iter()
            .filter(|t| t.account_id == account_id && t.transaction_type.is_cash_type())
            .collect();
        entries.sort_by_key(|t| (t.date, t.id));

        let mut balance = Decimal::ZERO;
        let mut movements = Vec::with_capacity(entries.len());
        for t in entries {
            let amount = self.signed_amount(t)?;
            balance = balance.checked_add(amount).ok_or_else(|| {
                CoreError::overflow(format!("cash balance of account {account_id} on {}", t.date))
            })?;
            movements.push(CashMovement {
                transaction_id: t.id,
                date: t.date,
                amount,
                balance,
            });
        }
        Ok(movements)
    }
}

impl Default for CashService {
    fn default() -> Self {
        Self::new()
    }
}
