pub mod errors;
pub mod models;
pub mod services;
pub mod storage;
pub mod stores;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use tokio::sync::Mutex;

use errors::CoreError;
use models::{
    account::{Account, AccountId, NewAccount},
    bucket::{BucketSummary, BucketSummation},
    holding::{Holding, HoldingId},
    investment::{Investment, InvestmentId, NewInvestment},
    portfolio::PortfolioData,
    quote::{Quote, QuoteSeries},
    report::{
        HoldingsReportRow, InvestmentChangeRow, RollupPoint, SectorSummaryRow, SortBy, SortOrder,
        TypeSectorRow, ValuedHolding,
    },
    settings::Settings,
    transaction::{
        NewTransaction, Transaction, TransactionDraft, TransactionFilter, TransactionId,
        TransactionType,
    },
};
use services::{
    bucket_service::{BucketRule, BucketService, ConfiguredBucketRule},
    cash_service::{CashMovement, CashService},
    position_service::{PositionService, PENDING_TRANSACTION_ID},
    report_service::ReportService,
    valuation_service::ValuationService,
};
use storage::manager::StorageManager;
use stores::memory::MemoryStore;
use stores::traits::PortfolioStore;

/// Holding id given to a buy that is validated before its lineage exists.
const PENDING_HOLDING_ID: HoldingId = HoldingId(i64::MAX);

/// Both legs of a cash transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLegs {
    /// Negative leg on the sending account.
    pub debit: Transaction,
    /// Positive leg on the receiving account, linked to `debit`.
    pub credit: Transaction,
}

/// Main entry point for the portfolio tracker core library.
///
/// Owns a store and the services operating on it. Every ledger write is
/// validated by folding the affected lineage before anything is appended,
/// and every report is recomputed from the ledger and quotes.
#[must_use]
pub struct PortfolioTracker<S = MemoryStore>
where
    S: PortfolioStore,
{
    store: S,
    settings: Settings,
    configured_rule: ConfiguredBucketRule,
    custom_rule: Option<Box<dyn BucketRule>>,
    /// Held by every write through the tracker: validate-then-append is
    /// atomic, and an import rollback only ever undoes the import itself.
    write_lock: Mutex<()>,
    position_service: PositionService,
    valuation_service: ValuationService,
    cash_service: CashService,
    bucket_service: BucketService,
    report_service: ReportService,
}

impl<S: PortfolioStore> std::fmt::Debug for PortfolioTracker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioTracker")
            .field("settings", &self.settings)
            .field("custom_bucket_rule", &self.custom_rule.is_some())
            .finish()
    }
}

impl PortfolioTracker<MemoryStore> {
    /// Create a brand new empty in-memory portfolio with default settings.
    pub fn create_new() -> Self {
        Self::build(MemoryStore::new(), Settings::default())
    }

    /// Load a portfolio from PFTK bytes.
    pub fn load_from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let data = StorageManager::load_from_bytes(bytes)?;
        log::info!(
            "Loaded portfolio: {} accounts, {} transactions",
            data.accounts.len(),
            data.transactions.len()
        );
        let settings = data.settings.clone();
        Ok(Self::build(MemoryStore::from_data(data), settings))
    }

    /// Save the current portfolio, settings included, to PFTK bytes.
    pub async fn save_to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        StorageManager::save_to_bytes(&self.export_data().await)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let bytes = std::fs::read(path)?;
        Self::load_from_bytes(&bytes)
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        StorageManager::save_to_file(&self.export_data().await, path)
    }

    /// A copy of all stored data, carrying the tracker's current settings.
    pub async fn export_data(&self) -> PortfolioData {
        let mut data = self.store.snapshot().await;
        data.settings = self.settings.clone();
        data
    }

    /// Import ledger entries from a JSON array of drafts, all or nothing.
    ///
    /// Account and investment ids must exist in this portfolio. Holding
    /// ids in the file are local keys: the first buy naming one opens a new
    /// lineage and later entries naming it are mapped onto that lineage.
    /// On any failure the store is rolled back and the error returned.
    /// The import holds the write lock throughout, so the rollback cannot
    /// discard writes made through this tracker; writes made directly on
    /// the store are not covered.
    pub async fn import_transactions_from_json(
        &self,
        json: &str,
    ) -> Result<Vec<Transaction>, CoreError> {
        let drafts: Vec<TransactionDraft> = serde_json::from_str(json)?;
        let _guard = self.write_lock.lock().await;
        let before = self.store.snapshot().await;

        let mut lineages: HashMap<HoldingId, HoldingId> = HashMap::new();
        let mut recorded = Vec::with_capacity(drafts.len());
        for (index, mut draft) in drafts.into_iter().enumerate() {
            let opens_lineage = draft.transaction_type == Some(TransactionType::Buy)
                && draft
                    .holding_id
                    .is_some_and(|key| !lineages.contains_key(&key));
            let file_key = draft.holding_id;
            draft.holding_id = if opens_lineage {
                None
            } else {
                file_key.map(|key| lineages.get(&key).copied().unwrap_or(key))
            };

            match self.dispatch_draft(draft).await {
                Ok(transaction) => {
                    if let (true, Some(key), Some(id)) =
                        (opens_lineage, file_key, transaction.holding_id)
                    {
                        lineages.insert(key, id);
                    }
                    recorded.push(transaction);
                }
                Err(e) => {
                    log::warn!("Import failed at entry {index}, rolling back: {e}");
                    self.store.replace(before).await;
                    return Err(e);
                }
            }
        }

        log::info!("Imported {} ledger entries", recorded.len());
        Ok(recorded)
    }
}

impl<S: PortfolioStore> PortfolioTracker<S> {
    /// Wrap an existing store with default settings.
    pub fn new(store: S) -> Self {
        Self::build(store, Settings::default())
    }

    /// Wrap an existing store with the given (validated) settings.
    pub fn with_settings(store: S, settings: Settings) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self::build(store, settings))
    }

    /// Replace the settings-driven bucket rule with a custom classifier.
    pub fn with_bucket_rule(mut self, rule: impl BucketRule + 'static) -> Self {
        self.custom_rule = Some(Box::new(rule));
        self
    }

    fn build(store: S, settings: Settings) -> Self {
        Self {
            store,
            configured_rule: ConfiguredBucketRule::from_settings(&settings),
            settings,
            custom_rule: None,
            write_lock: Mutex::new(()),
            position_service: PositionService::new(),
            valuation_service: ValuationService::new(),
            cash_service: CashService::new(),
            bucket_service: BucketService::new(),
            report_service: ReportService::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ── Settings ────────────────────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace all settings. Rejected settings leave the current ones in place.
    pub fn set_settings(&mut self, settings: Settings) -> Result<(), CoreError> {
        settings.validate()?;
        self.configured_rule = ConfiguredBucketRule::from_settings(&settings);
        self.settings = settings;
        Ok(())
    }

    pub fn set_fetch_timeout_ms(&mut self, timeout_ms: Option<u64>) -> Result<(), CoreError> {
        let mut settings = self.settings.clone();
        settings.fetch_timeout_ms = timeout_ms;
        self.set_settings(settings)
    }

    fn bucket_rule(&self) -> &dyn BucketRule {
        match &self.custom_rule {
            Some(rule) => rule.as_ref(),
            None => &self.configured_rule,
        }
    }

    /// Await a store fetch under the configured deadline.
    async fn fetch<T, F>(&self, what: &str, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match self.settings.fetch_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                CoreError::Timeout(format!("{what} exceeded {} ms", limit.as_millis()))
            })?,
            None => fut.await,
        }
    }

    // ── Investments ─────────────────────────────────────────────────

    pub async fn create_investment(
        &self,
        new_investment: NewInvestment,
    ) -> Result<Investment, CoreError> {
        if new_investment.symbol.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Investment symbol cannot be empty".into(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        let investment = self.store.create_investment(new_investment).await?;
        log::info!("Created investment {} ({})", investment.symbol, investment.id);
        Ok(investment)
    }

    pub async fn find_investment(
        &self,
        id: InvestmentId,
    ) -> Result<Option<Investment>, CoreError> {
        self.fetch("investment lookup", self.store.get_investment(id))
            .await
    }

    pub async fn find_investment_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Investment>, CoreError> {
        self.fetch(
            "investment lookup",
            self.store.find_investment_by_symbol(symbol),
        )
        .await
    }

    pub async fn list_investments(&self) -> Result<Vec<Investment>, CoreError> {
        self.fetch("investment list", self.store.list_investments())
            .await
    }

    /// Edit the mutable fields of an investment (name, exchange, sector, type).
    pub async fn update_investment(&self, investment: Investment) -> Result<Investment, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.store.update_investment(investment).await
    }

    // ── Accounts ────────────────────────────────────────────────────

    pub async fn create_account(&self, new_account: NewAccount) -> Result<Account, CoreError> {
        if new_account.account_number.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Account number cannot be empty".into(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        let account = self.store.create_account(new_account).await?;
        log::info!(
            "Created account {} ({})",
            account.account_number,
            account.id
        );
        Ok(account)
    }

    /// Account with `cash_on_account` recomputed from the ledger.
    pub async fn find_account(&self, id: AccountId) -> Result<Option<Account>, CoreError> {
        match self.fetch("account lookup", self.store.get_account(id)).await? {
            Some(account) => Ok(Some(self.with_cash(account).await?)),
            None => Ok(None),
        }
    }

    /// Account by its external number, cash recomputed from the ledger.
    pub async fn find_account_by_number(
        &self,
        account_number: &str,
    ) -> Result<Option<Account>, CoreError> {
        match self
            .fetch(
                "account lookup",
                self.store.find_account_by_number(account_number),
            )
            .await?
        {
            Some(account) => Ok(Some(self.with_cash(account).await?)),
            None => Ok(None),
        }
    }

    /// All accounts, cash recomputed from the ledger.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        let accounts = self
            .fetch("account list", self.store.list_accounts())
            .await?;
        let ledger = self
            .fetch(
                "ledger fetch",
                self.store.list_transactions(TransactionFilter::all()),
            )
            .await?;
        accounts
            .into_iter()
            .map(|mut account| {
                account.cash_on_account = self.cash_service.balance(account.id, &ledger)?;
                Ok(account)
            })
            .collect()
    }

    /// Edit account details. The cash field is ignored and recomputed.
    pub async fn update_account(&self, account: Account) -> Result<Account, CoreError> {
        let updated = {
            let _guard = self.write_lock.lock().await;
            self.store.update_account(account).await?
        };
        self.with_cash(updated).await
    }

    async fn with_cash(&self, mut account: Account) -> Result<Account, CoreError> {
        account.cash_on_account = self.compute_account_cash_balance(account.id).await?;
        Ok(account)
    }

    // ── Quotes ──────────────────────────────────────────────────────

    /// Store a quote, replacing any quote for the same investment and date.
    /// Returns the replaced quote.
    pub async fn add_quote(&self, quote: Quote) -> Result<Option<Quote>, CoreError> {
        if quote.close < Decimal::ZERO {
            return Err(CoreError::ValidationError(format!(
                "Quote close for {} on {} is negative",
                quote.investment_id, quote.date
            )));
        }
        let (investment_id, date) = (quote.investment_id, quote.date);
        let _guard = self.write_lock.lock().await;
        let replaced = self.store.upsert_quote(quote).await?;
        if let Some(old) = &replaced {
            log::warn!(
                "Replaced quote of investment {investment_id} on {date} (old close {})",
                old.close
            );
        }
        Ok(replaced)
    }

    /// Store several quotes; returns how many replaced existing ones.
    pub async fn add_quotes(&self, quotes: Vec<Quote>) -> Result<usize, CoreError> {
        let mut replaced = 0;
        for quote in quotes {
            if self.add_quote(quote).await?.is_some() {
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    pub async fn list_quotes(&self, investment_id: InvestmentId) -> Result<Vec<Quote>, CoreError> {
        self.fetch("quote list", self.store.list_quotes(investment_id))
            .await
    }

    pub async fn latest_quote(
        &self,
        investment_id: InvestmentId,
        as_of: NaiveDate,
    ) -> Result<Option<Quote>, CoreError> {
        self.fetch(
            "quote lookup",
            self.store.latest_quote_on_or_before(investment_id, as_of),
        )
        .await
    }

    // ── Ledger Writes ───────────────────────────────────────────────

    /// Buy into a new holding lineage. A cash withdrawal of
    /// `quantity * price` is appended first and linked from the buy.
    pub async fn record_buy(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_buy(account_id, investment_id, date, quantity, price)
            .await
    }

    /// Buy more units into an open lineage; its cost basis becomes the
    /// weighted average.
    pub async fn record_additional_buy(
        &self,
        holding_id: HoldingId,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_trade(holding_id, TransactionType::Buy, date, quantity, price)
            .await
    }

    /// Sell from a lineage. Overselling fails with `InsufficientQuantity`
    /// and nothing is appended.
    pub async fn record_sell(
        &self,
        holding_id: HoldingId,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_trade(holding_id, TransactionType::Sell, date, quantity, price)
            .await
    }

    /// Dividend income on an account. With a holding id the amount is
    /// also accumulated on that holding.
    pub async fn record_dividend(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        holding_id: Option<HoldingId>,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_dividend(account_id, investment_id, holding_id, date, amount)
            .await
    }

    /// Signed cash movement: deposits positive, withdrawals negative.
    pub async fn record_cash(
        &self,
        account_id: AccountId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_cash(account_id, date, amount).await
    }

    /// Move cash between two accounts as a linked debit/credit pair.
    pub async fn record_transfer(
        &self,
        from_account: AccountId,
        to_account: AccountId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<TransferLegs, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_transfer(from_account, to_account, date, amount)
            .await
    }

    /// Shares leaving a holding (transfer-out), no cash effect.
    pub async fn record_share_transfer(
        &self,
        holding_id: HoldingId,
        date: NaiveDate,
        quantity: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_lineage_entry(
            holding_id,
            TransactionType::Transfer,
            date,
            quantity,
            Decimal::ZERO,
            None,
        )
        .await
    }

    /// Reinvest `quantity * price` of dividends into the holding: a
    /// dividend entry funds a reinvest entry that references it, so the
    /// pair leaves cash unchanged.
    pub async fn record_reinvest_dividend(
        &self,
        holding_id: HoldingId,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_reinvest(holding_id, date, quantity, price)
            .await
    }

    /// Stock split adding `added_quantity` units at unchanged total cost.
    pub async fn record_split(
        &self,
        holding_id: HoldingId,
        date: NaiveDate,
        added_quantity: Decimal,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.append_lineage_entry(
            holding_id,
            TransactionType::Split,
            date,
            added_quantity,
            Decimal::ZERO,
            None,
        )
        .await
    }

    /// Validate a loosely-typed draft and record it through the matching
    /// typed operation. Returns the primary entry (the trade, or the debit
    /// leg of a transfer).
    pub async fn record_transaction(
        &self,
        draft: TransactionDraft,
    ) -> Result<Transaction, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.dispatch_draft(draft).await
    }

    // The append_* helpers below assume the caller holds `write_lock`.

    async fn dispatch_draft(&self, draft: TransactionDraft) -> Result<Transaction, CoreError> {
        let kind = required(draft.transaction_type, "transaction type")?;
        let date = required(draft.date, "date")?;

        match kind {
            TransactionType::Buy => {
                let quantity = required(draft.trade_quantity, "quantity")?;
                let price = required(draft.trade_price, "price")?;
                match draft.holding_id {
                    Some(holding_id) => {
                        self.append_trade(holding_id, kind, date, quantity, price)
                            .await
                    }
                    None => {
                        let account_id = required(draft.account_id, "account")?;
                        let investment_id = required(draft.investment_id, "investment")?;
                        self.append_buy(account_id, investment_id, date, quantity, price)
                            .await
                    }
                }
            }
            TransactionType::Sell => {
                let holding_id = required(draft.holding_id, "holding")?;
                let quantity = required(draft.trade_quantity, "quantity")?;
                let price = required(draft.trade_price, "price")?;
                self.append_trade(holding_id, kind, date, quantity, price)
                    .await
            }
            TransactionType::Dividend => {
                let account_id = required(draft.account_id, "account")?;
                let investment_id = required(draft.investment_id, "investment")?;
                let amount = match draft.dividend {
                    Some(amount) => amount,
                    None => trade_amount(
                        required(draft.trade_quantity, "quantity")?,
                        required(draft.trade_price, "price")?,
                    )?,
                };
                self.append_dividend(account_id, investment_id, draft.holding_id, date, amount)
                    .await
            }
            TransactionType::Cash => {
                let account_id = required(draft.account_id, "account")?;
                let amount = trade_amount(
                    required(draft.trade_quantity, "quantity")?,
                    required(draft.trade_price, "price")?,
                )?;
                self.append_cash(account_id, date, amount).await
            }
            TransactionType::Transfer => match draft.holding_id {
                Some(holding_id) => {
                    let quantity = required(draft.trade_quantity, "quantity")?;
                    self.append_lineage_entry(holding_id, kind, date, quantity, Decimal::ZERO, None)
                        .await
                }
                None => {
                    let from = required(draft.account_id, "account")?;
                    let to = required(draft.to_account_id, "receiving account")?;
                    let amount = trade_amount(
                        required(draft.trade_quantity, "quantity")?,
                        required(draft.trade_price, "price")?,
                    )?;
                    Ok(self.append_transfer(from, to, date, amount).await?.debit)
                }
            },
            TransactionType::ReinvestDividend => {
                let holding_id = required(draft.holding_id, "holding")?;
                let quantity = required(draft.trade_quantity, "quantity")?;
                let price = required(draft.trade_price, "price")?;
                self.append_reinvest(holding_id, date, quantity, price)
                    .await
            }
            TransactionType::Split => {
                let holding_id = required(draft.holding_id, "holding")?;
                let quantity = required(draft.trade_quantity, "quantity")?;
                self.append_lineage_entry(holding_id, kind, date, quantity, Decimal::ZERO, None)
                    .await
            }
        }
    }

    async fn append_buy(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, CoreError> {
        let pending = NewTransaction::new(account_id, TransactionType::Buy, date, quantity, price)
            .for_investment(investment_id)
            .for_holding(PENDING_HOLDING_ID)
            .into_transaction(PENDING_TRANSACTION_ID);
        self.position_service.validate_entry(&pending)?;
        let cost = -trade_amount(quantity, price)?;
        self.check_cash(account_id, &[cash_leg(account_id, investment_id, date, cost)])
            .await?;

        let holding = self
            .store
            .create_holding(account_id, investment_id, date, price)
            .await?;
        let leg = self
            .append_cash_leg(account_id, investment_id, date, cost)
            .await?;

        let mut entry = NewTransaction::new(account_id, TransactionType::Buy, date, quantity, price)
            .for_investment(investment_id)
            .for_holding(holding.id);
        if let Some(leg) = &leg {
            entry = entry.associated_with(leg.id);
        }
        let buy = self.store.append_transaction(entry).await?;
        log::info!(
            "Recorded buy of {quantity} x {investment_id} at {price} into holding {} on {date}",
            holding.id
        );

        self.refresh_holding(holding.id).await?;
        self.refresh_account_cash(account_id).await?;
        Ok(buy)
    }

    /// Buy-more or sell against an existing lineage, with its cash leg.
    async fn append_trade(
        &self,
        holding_id: HoldingId,
        kind: TransactionType,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, CoreError> {
        let holding = self.require_holding(holding_id).await?;
        let pending = self
            .lineage_entry(&holding, kind, date, quantity, price)
            .into_transaction(PENDING_TRANSACTION_ID);
        self.check_lineage(&holding, &pending).await?;

        let amount = trade_amount(quantity, price)?;
        let signed = match kind {
            TransactionType::Sell => amount,
            _ => -amount,
        };
        self.check_cash(
            holding.account_id,
            &[cash_leg(holding.account_id, holding.investment_id, date, signed)],
        )
        .await?;
        let leg = self
            .append_cash_leg(holding.account_id, holding.investment_id, date, signed)
            .await?;
        self.append_lineage_entry(holding_id, kind, date, quantity, price, leg.map(|l| l.id))
            .await
    }

    /// Append an entry against a lineage after folding it in. `linked`
    /// is recorded as the associated cash entry.
    async fn append_lineage_entry(
        &self,
        holding_id: HoldingId,
        kind: TransactionType,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
        linked: Option<TransactionId>,
    ) -> Result<Transaction, CoreError> {
        let holding = self.require_holding(holding_id).await?;
        let mut entry = self.lineage_entry(&holding, kind, date, quantity, price);
        if let Some(id) = linked {
            entry = entry.associated_with(id);
        }
        self.check_lineage(&holding, &entry.clone().into_transaction(PENDING_TRANSACTION_ID))
            .await?;

        let transaction = self.store.append_transaction(entry).await?;
        log::info!("Recorded {kind} of {quantity} on holding {holding_id} ({date})");

        self.refresh_holding(holding_id).await?;
        if kind.is_cash_type() || linked.is_some() {
            self.refresh_account_cash(holding.account_id).await?;
        }
        Ok(transaction)
    }

    async fn append_dividend(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        holding_id: Option<HoldingId>,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<Transaction, CoreError> {
        let mut entry =
            NewTransaction::new(account_id, TransactionType::Dividend, date, amount, Decimal::ONE)
                .for_investment(investment_id)
                .with_dividend(amount);
        if let Some(holding_id) = holding_id {
            entry = entry.for_holding(holding_id);
            let holding = self.require_holding(holding_id).await?;
            self.check_lineage(&holding, &entry.clone().into_transaction(PENDING_TRANSACTION_ID))
                .await?;
        } else {
            self.position_service
                .validate_entry(&entry.clone().into_transaction(PENDING_TRANSACTION_ID))?;
        }
        self.check_cash(account_id, &[entry.clone()]).await?;

        let dividend = self.store.append_transaction(entry).await?;
        log::info!("Recorded dividend of {amount} on account {account_id} ({date})");

        if let Some(holding_id) = holding_id {
            self.refresh_holding(holding_id).await?;
        }
        self.refresh_account_cash(account_id).await?;
        Ok(dividend)
    }

    async fn append_cash(
        &self,
        account_id: AccountId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<Transaction, CoreError> {
        let entry =
            NewTransaction::new(account_id, TransactionType::Cash, date, amount, Decimal::ONE);
        self.position_service
            .validate_entry(&entry.clone().into_transaction(PENDING_TRANSACTION_ID))?;
        self.check_cash(account_id, &[entry.clone()]).await?;

        let cash = self.store.append_transaction(entry).await?;
        log::info!("Recorded cash movement of {amount} on account {account_id} ({date})");
        self.refresh_account_cash(account_id).await?;
        Ok(cash)
    }

    async fn append_transfer(
        &self,
        from_account: AccountId,
        to_account: AccountId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<TransferLegs, CoreError> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::MalformedTransaction(format!(
                "Transfer amount must be positive, got {amount}"
            )));
        }
        if from_account == to_account {
            return Err(CoreError::MalformedTransaction(format!(
                "Transfer from account {from_account} to itself"
            )));
        }
        for id in [from_account, to_account] {
            if self.store.get_account(id).await?.is_none() {
                return Err(CoreError::unknown("account", id));
            }
        }
        let debit_entry = NewTransaction::new(
            from_account,
            TransactionType::Transfer,
            date,
            amount,
            Decimal::NEGATIVE_ONE,
        );
        let credit_entry =
            NewTransaction::new(to_account, TransactionType::Transfer, date, amount, Decimal::ONE);
        self.check_cash(from_account, &[debit_entry.clone()]).await?;
        self.check_cash(to_account, &[credit_entry.clone()]).await?;

        let debit = self.store.append_transaction(debit_entry).await?;
        let credit = self
            .store
            .append_transaction(credit_entry.associated_with(debit.id))
            .await?;
        log::info!(
            "Recorded transfer of {amount} from account {from_account} to {to_account} ({date})"
        );

        self.refresh_account_cash(from_account).await?;
        self.refresh_account_cash(to_account).await?;
        Ok(TransferLegs { debit, credit })
    }

    async fn append_reinvest(
        &self,
        holding_id: HoldingId,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, CoreError> {
        let holding = self.require_holding(holding_id).await?;
        let reinvest =
            self.lineage_entry(&holding, TransactionType::ReinvestDividend, date, quantity, price);
        self.check_lineage(&holding, &reinvest.clone().into_transaction(PENDING_TRANSACTION_ID))
            .await?;

        let proceeds = trade_amount(quantity, price)?;
        let funding = NewTransaction::new(
            holding.account_id,
            TransactionType::Dividend,
            date,
            proceeds,
            Decimal::ONE,
        )
        .for_investment(holding.investment_id)
        .for_holding(holding_id)
        .with_dividend(proceeds);
        self.check_cash(holding.account_id, &[funding.clone(), reinvest])
            .await?;
        let dividend = self.store.append_transaction(funding).await?;
        self.append_lineage_entry(
            holding_id,
            TransactionType::ReinvestDividend,
            date,
            quantity,
            price,
            Some(dividend.id),
        )
        .await
    }

    /// Cash entry generated by a trade; none when the trade moves no cash.
    async fn append_cash_leg(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<Option<Transaction>, CoreError> {
        if amount.is_zero() {
            return Ok(None);
        }
        let leg = self
            .store
            .append_transaction(cash_leg(account_id, investment_id, date, amount))
            .await?;
        Ok(Some(leg))
    }

    fn lineage_entry(
        &self,
        holding: &Holding,
        kind: TransactionType,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
    ) -> NewTransaction {
        NewTransaction::new(holding.account_id, kind, date, quantity, price)
            .for_investment(holding.investment_id)
            .for_holding(holding.id)
    }

    async fn require_holding(&self, holding_id: HoldingId) -> Result<Holding, CoreError> {
        self.store
            .get_holding(holding_id)
            .await?
            .ok_or_else(|| CoreError::unknown("holding", holding_id))
    }

    /// Fold the lineage's stored entries plus `pending`; any error means
    /// `pending` must not be appended.
    async fn check_lineage(
        &self,
        holding: &Holding,
        pending: &Transaction,
    ) -> Result<(), CoreError> {
        let existing = self
            .store
            .list_transactions(TransactionFilter::holding(holding.id))
            .await?;
        self.position_service
            .reduce_with_pending(&existing, pending)
            .map(|_| ())
    }

    /// Fold the account's cash with `pending` appended; an entry that
    /// would push the balance out of range is rejected before any write.
    async fn check_cash(
        &self,
        account_id: AccountId,
        pending: &[NewTransaction],
    ) -> Result<(), CoreError> {
        let mut entries = self
            .store
            .list_transactions(TransactionFilter::account(account_id))
            .await?;
        entries.extend(
            pending
                .iter()
                .map(|entry| entry.clone().into_transaction(PENDING_TRANSACTION_ID)),
        );
        match self.cash_service.balance(account_id, &entries) {
            Ok(_) => Ok(()),
            Err(CoreError::Overflow(what)) => Err(CoreError::MalformedTransaction(format!(
                "entry overflows the {what}"
            ))),
            Err(e) => Err(e),
        }
    }

    /// Rewrite the cached state of a lineage from the ledger.
    async fn refresh_holding(&self, holding_id: HoldingId) -> Result<(), CoreError> {
        let entries = self
            .store
            .list_transactions(TransactionFilter::holding(holding_id))
            .await?;
        if let Some(reduced) = self.position_service.reduce(&entries)?.remove(&holding_id) {
            self.store.save_holding(reduced).await?;
        }
        Ok(())
    }

    /// Rewrite the cached cash of an account from the ledger.
    async fn refresh_account_cash(&self, account_id: AccountId) -> Result<(), CoreError> {
        if let Some(mut account) = self.store.get_account(account_id).await? {
            let entries = self
                .store
                .list_transactions(TransactionFilter::account(account_id))
                .await?;
            account.cash_on_account = self.cash_service.balance(account_id, &entries)?;
            self.store.update_account(account).await?;
        }
        Ok(())
    }

    // ── Ledger Queries ──────────────────────────────────────────────

    /// Ledger entries matching `filter`, ordered by date then id.
    pub async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, CoreError> {
        self.fetch("ledger fetch", self.store.list_transactions(filter))
            .await
    }

    /// The buy entry that opened a holding.
    pub async fn purchase_transaction(
        &self,
        holding_id: HoldingId,
    ) -> Result<Option<Transaction>, CoreError> {
        let entries = self
            .list_transactions(TransactionFilter::holding(holding_id))
            .await?;
        Ok(entries
            .into_iter()
            .find(|t| t.transaction_type == TransactionType::Buy))
    }

    /// Export ledger entries as a JSON array of drafts that
    /// `import_transactions_from_json` accepts.
    ///
    /// Generated entries (trade cash legs, reinvest funding dividends,
    /// transfer credit legs) are folded into the draft that produced them.
    pub async fn export_transactions_to_json(
        &self,
        filter: TransactionFilter,
    ) -> Result<String, CoreError> {
        let ledger = self
            .list_transactions(TransactionFilter::all())
            .await?;

        let generated: HashSet<TransactionId> = ledger
            .iter()
            .filter(|t| t.transaction_type != TransactionType::Transfer)
            .filter_map(|t| t.associated_cash_transaction_id)
            .collect();
        let credit_of: HashMap<TransactionId, AccountId> = ledger
            .iter()
            .filter(|t| t.transaction_type == TransactionType::Transfer && t.holding_id.is_none())
            .filter_map(|t| t.associated_cash_transaction_id.map(|debit| (debit, t.account_id)))
            .collect();

        let drafts: Vec<TransactionDraft> = ledger
            .iter()
            .filter(|t| filter.matches(t) && !generated.contains(&t.id))
            .filter_map(|t| {
                let cash_transfer =
                    t.transaction_type == TransactionType::Transfer && t.holding_id.is_none();
                if cash_transfer && t.associated_cash_transaction_id.is_some() {
                    return None;
                }
                Some(TransactionDraft {
                    transaction_type: Some(t.transaction_type),
                    account_id: Some(t.account_id),
                    to_account_id: if cash_transfer { credit_of.get(&t.id).copied() } else { None },
                    investment_id: t.investment_id,
                    holding_id: t.holding_id,
                    date: Some(t.date),
                    trade_price: Some(if cash_transfer {
                        t.trade_price.abs()
                    } else {
                        t.trade_price
                    }),
                    trade_quantity: Some(t.trade_quantity),
                    dividend: t.dividend,
                })
            })
            .collect();

        Ok(serde_json::to_string_pretty(&drafts)?)
    }

    // ── Positions & Cash ────────────────────────────────────────────

    /// All holding lineages reduced from the ledger, closed ones included,
    /// optionally restricted to one account.
    pub async fn compute_positions(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Holding>, CoreError> {
        let filter = match account_id {
            Some(id) => TransactionFilter::account(id),
            None => TransactionFilter::all(),
        };
        let entries = self.list_transactions(filter).await?;
        Ok(self.position_service.reduce(&entries)?.into_values().collect())
    }

    /// Cash on an account, folded from its ledger entries on every call.
    pub async fn compute_account_cash_balance(
        &self,
        account_id: AccountId,
    ) -> Result<Decimal, CoreError> {
        if self
            .fetch("account lookup", self.store.get_account(account_id))
            .await?
            .is_none()
        {
            return Err(CoreError::unknown("account", account_id));
        }
        let entries = self
            .list_transactions(TransactionFilter::account(account_id))
            .await?;
        self.cash_service.balance(account_id, &entries)
    }

    /// Balance after each cash entry of an account.
    pub async fn account_cash_history(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<CashMovement>, CoreError> {
        let entries = self
            .list_transactions(TransactionFilter::account(account_id))
            .await?;
        self.cash_service.running_balance(account_id, &entries)
    }

    // ── Reports ─────────────────────────────────────────────────────

    /// Open positions as of `as_of` (ledger entries after it are ignored),
    /// each valued against its latest quote on or before `as_of`.
    async fn valued_holdings(&self, as_of: NaiveDate) -> Result<Vec<ValuedHolding>, CoreError> {
        let ledger = self
            .list_transactions(TransactionFilter::all())
            .await?;
        let open = self
            .position_service
            .open_positions(self.position_service.reduce_as_of(&ledger, as_of)?);

        let mut investments: HashMap<InvestmentId, Investment> = HashMap::new();
        let mut valued = Vec::with_capacity(open.len());
        for holding in open {
            let investment = match investments.get(&holding.investment_id) {
                Some(investment) => investment.clone(),
                None => {
                    let investment = self
                        .find_investment(holding.investment_id)
                        .await?
                        .ok_or_else(|| CoreError::unknown("investment", holding.investment_id))?;
                    investments.insert(investment.id, investment.clone());
                    investment
                }
            };
            let quote = self.latest_quote(holding.investment_id, as_of).await?;
            let valuation = self.valuation_service.value(&holding, quote.as_ref())?;
            valued.push(ValuedHolding {
                holding,
                investment,
                valuation,
            });
        }
        log::debug!("Valued {} open holdings as of {as_of}", valued.len());
        Ok(valued)
    }

    /// All open holdings with valuation, sorted by `sort_by` in `order`;
    /// ties by symbol ascending. Unquoted holdings have `None` market
    /// fields and sort last.
    pub async fn compute_open_holdings_report(
        &self,
        as_of: NaiveDate,
        sort_by: SortBy,
        order: SortOrder,
    ) -> Result<Vec<HoldingsReportRow>, CoreError> {
        let valued = self.valued_holdings(as_of).await?;
        Ok(self.report_service.open_holdings(&valued, sort_by, order))
    }

    /// Open holdings report with the configured default ordering.
    pub async fn compute_default_holdings_report(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<HoldingsReportRow>, CoreError> {
        self.compute_open_holdings_report(
            as_of,
            self.settings.default_sort_by,
            self.settings.default_sort_order,
        )
        .await
    }

    /// Open holdings summed per (investment type, sector).
    pub async fn compute_type_sector_report(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<TypeSectorRow>, CoreError> {
        let valued = self.valued_holdings(as_of).await?;
        self.report_service.type_sector(&valued)
    }

    /// Open lots summed per investment and valued against the latest quote
    /// on or before `as_of`, ordered by symbol.
    pub async fn compute_investment_change_report(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<InvestmentChangeRow>, CoreError> {
        let valued = self.valued_holdings(as_of).await?;
        self.report_service.investment_changes(&valued)
    }

    /// Purchase value against market value per sector as of `as_of`, or
    /// as of the latest stored quote date when `None`.
    pub async fn compute_sector_summary(
        &self,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<SectorSummaryRow>, CoreError> {
        let as_of = match as_of {
            Some(date) => date,
            None => match self.latest_quote_date().await? {
                Some(date) => date,
                None => Utc::now().date_naive(),
            },
        };
        let valued = self.valued_holdings(as_of).await?;
        self.report_service.sector_summary(&valued)
    }

    async fn latest_quote_date(&self) -> Result<Option<NaiveDate>, CoreError> {
        let mut latest = None;
        for investment in self.list_investments().await? {
            let quotes = self.list_quotes(investment.id).await?;
            latest = latest.max(quotes.iter().map(|q| q.date).max());
        }
        Ok(latest)
    }

    /// Bucket totals as of `as_of` (today when `None`). Every bucket is
    /// present in the result.
    pub async fn compute_bucket_summary(
        &self,
        as_of: Option<NaiveDate>,
    ) -> Result<BucketSummary, CoreError> {
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
        let valued = self.valued_holdings(as_of).await?;
        self.bucket_service
            .summarize(as_of, &valued, self.bucket_rule())
    }

    /// Persist the bucket totals for `date`, overwriting an existing
    /// snapshot of that date. A write that loses a race is re-read and
    /// retried up to `snapshot_retries` times before the conflict surfaces.
    pub async fn snapshot_bucket_summary(
        &self,
        date: NaiveDate,
    ) -> Result<BucketSummation, CoreError> {
        let summary = self.compute_bucket_summary(Some(date)).await?;
        let fresh = BucketSummation::from_summary(&summary);

        let _guard = self.write_lock.lock().await;
        let attempts = self.settings.snapshot_retries + 1;
        for attempt in 1..=attempts {
            let result = match self.store.find_summation(date).await? {
                Some(existing) => {
                    self.store
                        .update_summation(fresh.clone(), existing.version)
                        .await
                }
                None => self.store.insert_summation(fresh.clone()).await,
            };
            match result {
                Ok(written) => {
                    log::info!(
                        "Wrote bucket snapshot for {date} (version {})",
                        written.version
                    );
                    return Ok(written);
                }
                Err(CoreError::SnapshotConflict(_)) if attempt < attempts => {
                    log::warn!(
                        "Bucket snapshot for {date} conflicted (attempt {attempt}), retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::SnapshotConflict(date))
    }

    /// Stored bucket snapshots within the optional date bounds, oldest first.
    pub async fn bucket_summary_history(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<BucketSummation>, CoreError> {
        let summations = self
            .fetch("snapshot list", self.store.list_summations())
            .await?;
        Ok(summations
            .into_iter()
            .filter(|s| from.map_or(true, |d| s.summation_date >= d))
            .filter(|s| to.map_or(true, |d| s.summation_date <= d))
            .collect())
    }

    /// Portfolio market value on each quote date between `from` and `to`.
    pub async fn compute_portfolio_rollup(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RollupPoint>, CoreError> {
        self.rollup(None, from, to).await
    }

    /// Value of the positions in one investment on each of its quote dates
    /// between `from` and `to`.
    pub async fn compute_investment_rollup(
        &self,
        investment_id: InvestmentId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RollupPoint>, CoreError> {
        if self.find_investment(investment_id).await?.is_none() {
            return Err(CoreError::unknown("investment", investment_id));
        }
        self.rollup(Some(investment_id), from, to).await
    }

    async fn rollup(
        &self,
        investment: Option<InvestmentId>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RollupPoint>, CoreError> {
        let ledger = self
            .list_transactions(TransactionFilter::all())
            .await?;
        let investments: BTreeSet<InvestmentId> = ledger
            .iter()
            .filter_map(|t| t.investment_id)
            .filter(|id| investment.map_or(true, |only| only == *id))
            .collect();

        let mut quotes: BTreeMap<InvestmentId, QuoteSeries> = BTreeMap::new();
        for investment_id in investments {
            let series = QuoteSeries::from_quotes(self.list_quotes(investment_id).await?);
            quotes.insert(investment_id, series);
        }
        self.report_service
            .rollup_for(&ledger, &quotes, investment, from, to)
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, CoreError> {
    value.ok_or_else(|| CoreError::MalformedTransaction(format!("missing {field}")))
}

fn trade_amount(quantity: Decimal, price: Decimal) -> Result<Decimal, CoreError> {
    quantity
        .checked_mul(price)
        .ok_or_else(|| CoreError::MalformedTransaction(format!("{quantity} x {price} overflows")))
}

fn cash_leg(
    account_id: AccountId,
    investment_id: InvestmentId,
    date: NaiveDate,
    amount: Decimal,
) -> NewTransaction {
    NewTransaction::new(account_id, TransactionType::Cash, date, amount, Decimal::ONE)
        .for_investment(investment_id)
}
