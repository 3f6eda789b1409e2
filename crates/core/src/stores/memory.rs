use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::errors::CoreError;
use crate::models::account::{Account, AccountId, NewAccount};
use crate::models::bucket::BucketSummation;
use crate::models::holding::{Holding, HoldingId};
use crate::models::investment::{Investment, InvestmentId, NewInvestment};
use crate::models::portfolio::PortfolioData;
use crate::models::quote::{Quote, QuoteSeries};
use crate::models::transaction::{NewTransaction, Transaction, TransactionFilter, TransactionId};

use super::traits::{
    AccountStore, BucketSnapshotStore, HoldingStore, InvestmentStore, LedgerStore, QuoteStore,
};

/// In-process store over a `PortfolioData`, guarded by a single lock.
///
/// Every operation takes the lock once, so read-check-write sequences
/// inside one call (unique keys, snapshot versions) are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<PortfolioData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: PortfolioData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// A point-in-time copy of everything stored.
    pub async fn snapshot(&self) -> PortfolioData {
        self.data.read().await.clone()
    }

    /// Replace the stored data wholesale.
    pub async fn replace(&self, data: PortfolioData) {
        *self.data.write().await = data;
    }

    pub fn into_data(self) -> PortfolioData {
        self.data.into_inner()
    }
}

fn check_references(data: &PortfolioData, entry: &NewTransaction) -> Result<(), CoreError> {
    if !data.accounts.iter().any(|a| a.id == entry.account_id) {
        return Err(CoreError::unknown("account", entry.account_id));
    }
    if let Some(investment_id) = entry.investment_id {
        if !data.investments.iter().any(|i| i.id == investment_id) {
            return Err(CoreError::unknown("investment", investment_id));
        }
    }
    if let Some(holding_id) = entry.holding_id {
        if !data.holdings.iter().any(|h| h.id == holding_id) {
            return Err(CoreError::unknown("holding", holding_id));
        }
    }
    if let Some(linked) = entry.associated_cash_transaction_id {
        if !data.transactions.iter().any(|t| t.id == linked) {
            return Err(CoreError::unknown("transaction", linked));
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, CoreError> {
        let data = self.data.read().await;
        let mut transactions: Vec<Transaction> = data
            .transactions
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        transactions.sort_by_key(|t| (t.date, t.id));
        Ok(transactions)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, CoreError> {
        let data = self.data.read().await;
        Ok(data.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn append_transaction(&self, entry: NewTransaction) -> Result<Transaction, CoreError> {
        let mut data = self.data.write().await;
        check_references(&data, &entry)?;
        data.sequences.transaction += 1;
        let transaction = entry.into_transaction(TransactionId(data.sequences.transaction));
        data.transactions.push(transaction.clone());
        Ok(transaction)
    }
}

#[async_trait]
impl QuoteStore for MemoryStore {
    async fn latest_quote_on_or_before(
        &self,
        investment_id: InvestmentId,
        date: NaiveDate,
    ) -> Result<Option<Quote>, CoreError> {
        let data = self.data.read().await;
        Ok(data
            .quotes
            .get(&investment_id)
            .and_then(|series| series.latest_on_or_before(date))
            .cloned())
    }

    async fn list_quotes(&self, investment_id: InvestmentId) -> Result<Vec<Quote>, CoreError> {
        let data = self.data.read().await;
        Ok(data
            .quotes
            .get(&investment_id)
            .map(|series| series.as_slice().to_vec())
            .unwrap_or_default())
    }

    async fn upsert_quote(&self, quote: Quote) -> Result<Option<Quote>, CoreError> {
        let mut data = self.data.write().await;
        if !data.investments.iter().any(|i| i.id == quote.investment_id) {
            return Err(CoreError::unknown("investment", quote.investment_id));
        }
        Ok(data
            .quotes
            .entry(quote.investment_id)
            .or_insert_with(QuoteSeries::new)
            .upsert(quote))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, new_account: NewAccount) -> Result<Account, CoreError> {
        let mut data = self.data.write().await;
        let number = new_account.account_number.trim();
        if data.accounts.iter().any(|a| a.account_number == number) {
            return Err(CoreError::DuplicateKey(format!("account number {number}")));
        }
        data.sequences.account += 1;
        let account = new_account.into_account(AccountId(data.sequences.account));
        data.accounts.push(account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, CoreError> {
        let data = self.data.read().await;
        Ok(data.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn find_account_by_number(
        &self,
        account_number: &str,
    ) -> Result<Option<Account>, CoreError> {
        let data = self.data.read().await;
        let number = account_number.trim();
        Ok(data
            .accounts
            .iter()
            .find(|a| a.account_number == number)
            .cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        let data = self.data.read().await;
        Ok(data.accounts.clone())
    }

    async fn update_account(&self, account: Account) -> Result<Account, CoreError> {
        let mut data = self.data.write().await;
        if data
            .accounts
            .iter()
            .any(|a| a.id != account.id && a.account_number == account.account_number)
        {
            return Err(CoreError::DuplicateKey(format!(
                "account number {}",
                account.account_number
            )));
        }
        let slot = data
            .accounts
            .iter_mut()
            .find(|a| a.id == account.id)
            .ok_or_else(|| CoreError::unknown("account", account.id))?;
        *slot = account.clone();
        Ok(account)
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool, CoreError> {
        let mut data = self.data.write().await;
        if data.transactions.iter().any(|t| t.account_id == id) {
            return Err(CoreError::ValidationError(format!(
                "Account {id} has ledger entries and cannot be deleted"
            )));
        }
        let before = data.accounts.len();
        data.accounts.retain(|a| a.id != id);
        data.holdings.retain(|h| h.account_id != id);
        Ok(data.accounts.len() < before)
    }
}

#[async_trait]
impl InvestmentStore for MemoryStore {
    async fn create_investment(
        &self,
        new_investment: NewInvestment,
    ) -> Result<Investment, CoreError> {
        let mut data = self.data.write().await;
        let symbol = new_investment.symbol.trim().to_uppercase();
        if data.investments.iter().any(|i| i.symbol == symbol) {
            return Err(CoreError::DuplicateKey(format!("symbol {symbol}")));
        }
        data.sequences.investment += 1;
        let investment = new_investment.into_investment(InvestmentId(data.sequences.investment));
        data.investments.push(investment.clone());
        Ok(investment)
    }

    async fn get_investment(&self, id: InvestmentId) -> Result<Option<Investment>, CoreError> {
        let data = self.data.read().await;
        Ok(data.investments.iter().find(|i| i.id == id).cloned())
    }

    async fn find_investment_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Investment>, CoreError> {
        let data = self.data.read().await;
        let upper = symbol.trim().to_uppercase();
        Ok(data.investments.iter().find(|i| i.symbol == upper).cloned())
    }

    async fn list_investments(&self) -> Result<Vec<Investment>, CoreError> {
        let data = self.data.read().await;
        Ok(data.investments.clone())
    }

    async fn update_investment(&self, investment: Investment) -> Result<Investment, CoreError> {
        let mut data = self.data.write().await;
        let slot = data
            .investments
            .iter_mut()
            .find(|i| i.id == investment.id)
            .ok_or_else(|| CoreError::unknown("investment", investment.id))?;
        if slot.symbol != investment.symbol {
            return Err(CoreError::ValidationError(format!(
                "Investment symbol is immutable ({} -> {})",
                slot.symbol, investment.symbol
            )));
        }
        *slot = investment.clone();
        Ok(investment)
    }

    async fn delete_investment(&self, id: InvestmentId) -> Result<bool, CoreError> {
        let mut data = self.data.write().await;
        if data.transactions.iter().any(|t| t.investment_id == Some(id)) {
            return Err(CoreError::ValidationError(format!(
                "Investment {id} has ledger entries and cannot be deleted"
            )));
        }
        let before = data.investments.len();
        data.investments.retain(|i| i.id != id);
        data.quotes.remove(&id);
        data.holdings.retain(|h| h.investment_id != id);
        Ok(data.investments.len() < before)
    }
}

#[async_trait]
impl HoldingStore for MemoryStore {
    async fn create_holding(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        purchase_date: NaiveDate,
        purchase_price: Decimal,
    ) -> Result<Holding, CoreError> {
        let mut data = self.data.write().await;
        if !data.accounts.iter().any(|a| a.id == account_id) {
            return Err(CoreError::unknown("account", account_id));
        }
        if !data.investments.iter().any(|i| i.id == investment_id) {
            return Err(CoreError::unknown("investment", investment_id));
        }
        data.sequences.holding += 1;
        let holding = Holding {
            id: HoldingId(data.sequences.holding),
            account_id,
            investment_id,
            purchase_price,
            quantity: Decimal::ZERO,
            purchase_date,
            total_dividends: Decimal::ZERO,
        };
        data.holdings.push(holding.clone());
        Ok(holding)
    }

    async fn get_holding(&self, id: HoldingId) -> Result<Option<Holding>, CoreError> {
        let data = self.data.read().await;
        Ok(data.holdings.iter().find(|h| h.id == id).cloned())
    }

    async fn list_holdings(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Holding>, CoreError> {
        let data = self.data.read().await;
        Ok(data
            .holdings
            .iter()
            .filter(|h| account_id.map_or(true, |id| h.account_id == id))
            .cloned()
            .collect())
    }

    async fn save_holding(&self, holding: Holding) -> Result<Holding, CoreError> {
        let mut data = self.data.write().await;
        let slot = data
            .holdings
            .iter_mut()
            .find(|h| h.id == holding.id)
            .ok_or_else(|| CoreError::unknown("holding", holding.id))?;
        *slot = holding.clone();
        Ok(holding)
    }

    async fn delete_holding(&self, id: HoldingId) -> Result<bool, CoreError> {
        let mut data = self.data.write().await;
        if data.transactions.iter().any(|t| t.holding_id == Some(id)) {
            return Err(CoreError::ValidationError(format!(
                "Holding {id} has ledger entries and cannot be deleted"
            )));
        }
        let before = data.holdings.len();
        data.holdings.retain(|h| h.id != id);
        Ok(data.holdings.len() < before)
    }
}

#[async_trait]
impl BucketSnapshotStore for MemoryStore {
    async fn find_summation(&self, date: NaiveDate) -> Result<Option<BucketSummation>, CoreError> {
        let data = self.data.read().await;
        Ok(data
            .bucket_summations
            .iter()
            .find(|s| s.summation_date == date)
            .cloned())
    }

    async fn insert_summation(
        &self,
        summation: BucketSummation,
    ) -> Result<BucketSummation, CoreError> {
        let mut data = self.data.write().await;
        if data
            .bucket_summations
            .iter()
            .any(|s| s.summation_date == summation.summation_date)
        {
            return Err(CoreError::SnapshotConflict(summation.summation_date));
        }
        let pos = data
            .bucket_summations
            .partition_point(|s| s.summation_date < summation.summation_date);
        data.bucket_summations.insert(pos, summation.clone());
        Ok(summation)
    }

    async fn update_summation(
        &self,
        mut summation: BucketSummation,
        expected_version: u64,
    ) -> Result<BucketSummation, CoreError> {
        let mut data = self.data.write().await;
        let date = summation.summation_date;
        let slot = data
            .bucket_summations
            .iter_mut()
            .find(|s| s.summation_date == date)
            .ok_or(CoreError::SnapshotConflict(date))?;
        if slot.version != expected_version {
            return Err(CoreError::SnapshotConflict(date));
        }
        summation.version = expected_version + 1;
        *slot = summation.clone();
        Ok(summation)
    }

    async fn list_summations(&self) -> Result<Vec<BucketSummation>, CoreError> {
        let data = self.data.read().await;
        Ok(data.bucket_summations.clone())
    }
}
