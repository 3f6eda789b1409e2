use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::errors::CoreError;
use crate::models::account::{Account, AccountId, NewAccount};
use crate::models::bucket::BucketSummation;
use crate::models::holding::{Holding, HoldingId};
use crate::models::investment::{Investment, InvestmentId, NewInvestment};
use crate::models::quote::Quote;
use crate::models::transaction::{NewTransaction, Transaction, TransactionFilter, TransactionId};

/// Append-only transaction ledger.
///
/// The ledger is the sole source of truth for positions and cash. Entries
/// are never updated in place.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Matching entries ordered by `(date, id)` ascending.
    async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, CoreError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, CoreError>;

    /// Persist an entry and return it with its assigned id. Fails with
    /// `UnknownReference` if the entry names an account, investment or
    /// holding the store does not know.
    async fn append_transaction(&self, entry: NewTransaction) -> Result<Transaction, CoreError>;
}

/// Per-investment daily quotes.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn latest_quote_on_or_before(
        &self,
        investment_id: InvestmentId,
        date: NaiveDate,
    ) -> Result<Option<Quote>, CoreError>;

    /// All quotes of an investment, oldest first.
    async fn list_quotes(&self, investment_id: InvestmentId) -> Result<Vec<Quote>, CoreError>;

    /// Insert a quote, replacing the one stored for the same
    /// (investment, date). Returns the replaced quote.
    async fn upsert_quote(&self, quote: Quote) -> Result<Option<Quote>, CoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `DuplicateKey` if the account number is taken.
    async fn create_account(&self, new_account: NewAccount) -> Result<Account, CoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, CoreError>;

    async fn find_account_by_number(
        &self,
        account_number: &str,
    ) -> Result<Option<Account>, CoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, CoreError>;

    async fn update_account(&self, account: Account) -> Result<Account, CoreError>;

    /// Returns whether an account was removed.
    async fn delete_account(&self, id: AccountId) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait InvestmentStore: Send + Sync {
    /// Fails with `DuplicateKey` if the symbol is taken.
    async fn create_investment(
        &self,
        new_investment: NewInvestment,
    ) -> Result<Investment, CoreError>;

    async fn get_investment(&self, id: InvestmentId) -> Result<Option<Investment>, CoreError>;

    async fn find_investment_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Investment>, CoreError>;

    async fn list_investments(&self) -> Result<Vec<Investment>, CoreError>;

    async fn update_investment(&self, investment: Investment) -> Result<Investment, CoreError>;

    async fn delete_investment(&self, id: InvestmentId) -> Result<bool, CoreError>;
}

/// Registry of holding lineages plus a cache of their reduced state.
#[async_trait]
pub trait HoldingStore: Send + Sync {
    /// Register a new, still empty lineage and return it.
    async fn create_holding(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        purchase_date: NaiveDate,
        purchase_price: Decimal,
    ) -> Result<Holding, CoreError>;

    async fn get_holding(&self, id: HoldingId) -> Result<Option<Holding>, CoreError>;

    async fn list_holdings(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Holding>, CoreError>;

    /// Overwrite the cached state of an existing lineage.
    async fn save_holding(&self, holding: Holding) -> Result<Holding, CoreError>;

    async fn delete_holding(&self, id: HoldingId) -> Result<bool, CoreError>;
}

/// Dated bucket snapshots with a unique summation date.
#[async_trait]
pub trait BucketSnapshotStore: Send + Sync {
    async fn find_summation(&self, date: NaiveDate) -> Result<Option<BucketSummation>, CoreError>;

    /// Fails with `SnapshotConflict` if a summation exists for the date.
    async fn insert_summation(
        &self,
        summation: BucketSummation,
    ) -> Result<BucketSummation, CoreError>;

    /// Overwrite the summation for its date if its stored version still
    /// equals `expected_version`, otherwise fail with `SnapshotConflict`.
    /// The stored version is bumped.
    async fn update_summation(
        &self,
        summation: BucketSummation,
        expected_version: u64,
    ) -> Result<BucketSummation, CoreError>;

    /// All summations, oldest first.
    async fn list_summations(&self) -> Result<Vec<BucketSummation>, CoreError>;
}

/// Everything the tracker needs from persistence.
pub trait PortfolioStore:
    LedgerStore + QuoteStore + AccountStore + InvestmentStore + HoldingStore + BucketSnapshotStore
{
}

impl<T> PortfolioStore for T where
    T: LedgerStore + QuoteStore + AccountStore + InvestmentStore + HoldingStore + BucketSnapshotStore
{
}
