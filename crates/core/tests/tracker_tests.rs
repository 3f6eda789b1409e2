// ═══════════════════════════════════════════════════════════════════
// Tracker Tests — PortfolioTracker facade over the in-memory store
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use portfolio_tracker_core::errors::CoreError;
use portfolio_tracker_core::models::account::{Account, AccountId, NewAccount};
use portfolio_tracker_core::models::bucket::{BucketId, BucketSummation};
use portfolio_tracker_core::models::holding::{Holding, HoldingId};
use portfolio_tracker_core::models::investment::{Investment, InvestmentId, InvestmentType, NewInvestment};
use portfolio_tracker_core::models::quote::Quote;
use portfolio_tracker_core::models::report::{SortBy, SortOrder};
use portfolio_tracker_core::models::settings::{BucketMatcher, BucketRuleEntry, Settings};
use portfolio_tracker_core::models::transaction::{
    NewTransaction, Transaction, TransactionDraft, TransactionFilter, TransactionId,
    TransactionType,
};
use portfolio_tracker_core::stores::memory::MemoryStore;
use portfolio_tracker_core::stores::traits::{
    AccountStore, BucketSnapshotStore, HoldingStore, InvestmentStore, LedgerStore, QuoteStore,
};
use portfolio_tracker_core::PortfolioTracker;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

async fn account(tracker: &PortfolioTracker, number: &str) -> Account {
    tracker
        .create_account(NewAccount::new(format!("Account {number}"), number))
        .await
        .unwrap()
}

async fn stock(tracker: &PortfolioTracker, symbol: &str) -> Investment {
    tracker
        .create_investment(NewInvestment::new(symbol, format!("{symbol} Inc."), InvestmentType::Stock))
        .await
        .unwrap()
}

async fn quote(tracker: &PortfolioTracker, inv: &Investment, date: NaiveDate, close: Decimal) {
    tracker
        .add_quote(Quote::close_only(inv.id, date, close))
        .await
        .unwrap();
}

// ═══════════════════════════════════════════════════════════════════
// Portfolio flow: buy, sell, cash, buckets
// ═══════════════════════════════════════════════════════════════════

mod portfolio_flow {
    use super::*;

    /// Buy 100 AAPL at 275.50, value against a 280.00 close.
    #[tokio::test]
    async fn buy_is_valued_against_latest_close() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "123").await;
        let aapl = stock(&tracker, "AAPL").await;

        let buy = tracker
            .record_buy(acct.id, aapl.id, d(2020, 1, 21), dec!(100), dec!(275.50))
            .await
            .unwrap();
        let holding_id = buy.holding_id.unwrap();

        let positions = tracker.compute_positions(Some(acct.id)).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].id, holding_id);
        assert_eq!(positions[0].quantity, dec!(100));
        assert_eq!(positions[0].purchase_price, dec!(275.50));

        quote(&tracker, &aapl, d(2020, 1, 22), dec!(280.00)).await;
        let rows = tracker
            .compute_open_holdings_report(d(2020, 1, 22), SortBy::MarketValue, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "AAPL");
        assert_eq!(rows[0].market_value, Some(dec!(28000.00)));
        assert_eq!(rows[0].value_at_purchase, dec!(27550.00));
        assert_eq!(rows[0].change_in_value, Some(dec!(450.00)));
        assert_eq!(rows[0].price_at_close, Some(dec!(280.00)));
    }

    /// Sell 40, then an oversell of 100 fails and leaves 60.
    #[tokio::test]
    async fn oversell_fails_and_appends_nothing() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "123").await;
        let aapl = stock(&tracker, "AAPL").await;
        let buy = tracker
            .record_buy(acct.id, aapl.id, d(2020, 1, 21), dec!(100), dec!(275.50))
            .await
            .unwrap();
        let holding_id = buy.holding_id.unwrap();

        tracker
            .record_sell(holding_id, d(2020, 2, 1), dec!(40), dec!(300.00))
            .await
            .unwrap();
        let ledger_len = tracker
            .list_transactions(TransactionFilter::all())
            .await
            .unwrap()
            .len();

        let err = tracker
            .record_sell(holding_id, d(2020, 2, 2), dec!(100), dec!(300.00))
            .await
            .unwrap_err();
        match err {
            CoreError::InsufficientQuantity {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, dec!(100));
                assert_eq!(available, dec!(60));
            }
            other => panic!("expected InsufficientQuantity, got {other:?}"),
        }

        let positions = tracker.compute_positions(None).await.unwrap();
        assert_eq!(positions[0].quantity, dec!(60));
        let after = tracker
            .list_transactions(TransactionFilter::all())
            .await
            .unwrap();
        assert_eq!(after.len(), ledger_len, "nothing appended on failure");
        let cached = tracker.store().get_holding(holding_id).await.unwrap().unwrap();
        assert_eq!(cached.quantity, dec!(60));
    }

    /// Cash on account 1 only reflects its own entries.
    #[tokio::test]
    async fn cash_stays_on_its_own_account() {
        let tracker = PortfolioTracker::create_new();
        let one = account(&tracker, "1").await;
        let other = account(&tracker, "15").await;
        let inv = stock(&tracker, "VTI").await;

        tracker.record_cash(one.id, d(2020, 1, 1), dec!(50.50)).await.unwrap();
        tracker
            .record_dividend(other.id, inv.id, None, d(2020, 1, 2), dec!(22.50))
            .await
            .unwrap();

        assert_eq!(tracker.compute_account_cash_balance(one.id).await.unwrap(), dec!(50.50));
        assert_eq!(tracker.compute_account_cash_balance(other.id).await.unwrap(), dec!(22.50));
    }

    /// One holding per bucket plus an unclassified one.
    #[tokio::test]
    async fn bucket_summary_lists_every_bucket() {
        let tracker = PortfolioTracker::create_new().with_bucket_rule(
            |_: &Holding, inv: &Investment| match inv.symbol.as_str() {
                "SHORT" => BucketId::Bucket1,
                "MID" => BucketId::Bucket2,
                _ => BucketId::Unclassified,
            },
        );
        let acct = account(&tracker, "1").await;
        let date = d(2021, 6, 30);
        for (symbol, close) in [("SHORT", dec!(10)), ("MID", dec!(20)), ("OTHER", dec!(3))] {
            let inv = stock(&tracker, symbol).await;
            tracker
                .record_buy(acct.id, inv.id, d(2021, 1, 4), dec!(100), dec!(1))
                .await
                .unwrap();
            quote(&tracker, &inv, date, close).await;
        }

        let summary = tracker.compute_bucket_summary(Some(date)).await.unwrap();
        assert_eq!(summary.amount(BucketId::Bucket1), dec!(1000));
        assert_eq!(summary.amount(BucketId::Bucket2), dec!(2000));
        assert_eq!(summary.amount(BucketId::Unclassified), dec!(300));
        assert_eq!(summary.amount(BucketId::Bucket3), Decimal::ZERO);
        assert!(summary.get(BucketId::Bucket3).is_some());
        assert_eq!(summary.amount_at_purchase(BucketId::Bucket1), dec!(100));
        assert_eq!(summary.total_amount(), Some(dec!(3300)));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Snapshots & report ordering
// ═══════════════════════════════════════════════════════════════════

mod snapshots {
    use super::*;

    /// Two snapshots of the same date leave one row with the second values.
    #[tokio::test]
    async fn snapshot_is_idempotent_per_date() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "VTI").await;
        tracker
            .record_buy(acct.id, inv.id, d(2021, 1, 4), dec!(10), dec!(100))
            .await
            .unwrap();
        let date = d(2021, 3, 31);
        quote(&tracker, &inv, date, dec!(110)).await;

        let first = tracker.snapshot_bucket_summary(date).await.unwrap();
        assert_eq!(first.excluded_total, dec!(1100));

        quote(&tracker, &inv, date, dec!(120)).await;
        let second = tracker.snapshot_bucket_summary(date).await.unwrap();
        assert_eq!(second.excluded_total, dec!(1200));
        assert_eq!(second.version, first.version + 1);

        let history = tracker.bucket_summary_history(None, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].excluded_total, dec!(1200));
    }

    #[tokio::test]
    async fn concurrent_snapshots_keep_one_row() {
        let tracker = PortfolioTracker::create_new();
        let date = d(2021, 3, 31);
        let (a, b) = tokio::join!(
            tracker.snapshot_bucket_summary(date),
            tracker.snapshot_bucket_summary(date)
        );
        a.unwrap();
        b.unwrap();
        let history = tracker.bucket_summary_history(None, None).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    /// Market value desc, ties by symbol ascending.
    #[tokio::test]
    async fn report_sort_is_stable() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let date = d(2021, 6, 30);
        for (symbol, qty) in [("MSFT", dec!(10)), ("AAPL", dec!(10)), ("IBM", dec!(30)), ("KO", dec!(1))] {
            let inv = stock(&tracker, symbol).await;
            tracker
                .record_buy(acct.id, inv.id, d(2021, 1, 4), qty, dec!(1))
                .await
                .unwrap();
            quote(&tracker, &inv, date, dec!(5)).await;
        }
        stock(&tracker, "NOQT").await;

        let rows = tracker
            .compute_open_holdings_report(date, SortBy::MarketValue, SortOrder::Desc)
            .await
            .unwrap();
        let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["IBM", "AAPL", "MSFT", "KO"]);
        for pair in rows.windows(2) {
            assert!(pair[0].market_value >= pair[1].market_value);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Ledger writes
// ═══════════════════════════════════════════════════════════════════

mod ledger {
    use super::*;

    #[tokio::test]
    async fn buy_and_sell_append_linked_cash_legs() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "AAPL").await;
        tracker.record_cash(acct.id, d(2020, 1, 1), dec!(10000)).await.unwrap();

        let buy = tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 2), dec!(10), dec!(100))
            .await
            .unwrap();
        let leg_id = buy.associated_cash_transaction_id.unwrap();
        let leg = tracker.store().get_transaction(leg_id).await.unwrap().unwrap();
        assert_eq!(leg.transaction_type, TransactionType::Cash);
        assert_eq!(leg.amount(), Some(dec!(-1000)));
        assert_eq!(tracker.compute_account_cash_balance(acct.id).await.unwrap(), dec!(9000));

        tracker
            .record_sell(buy.holding_id.unwrap(), d(2020, 1, 3), dec!(5), dec!(120))
            .await
            .unwrap();
        assert_eq!(tracker.compute_account_cash_balance(acct.id).await.unwrap(), dec!(9600));
    }

    #[tokio::test]
    async fn account_reads_recompute_cash() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "77").await;
        tracker.record_cash(acct.id, d(2020, 1, 1), dec!(100)).await.unwrap();
        tracker.record_cash(acct.id, d(2020, 1, 2), dec!(-30)).await.unwrap();

        // Corrupt the cached column; reads must ignore it.
        let mut stale = tracker.store().get_account(acct.id).await.unwrap().unwrap();
        stale.cash_on_account = dec!(999999);
        tracker.store().update_account(stale).await.unwrap();

        let by_id = tracker.find_account(acct.id).await.unwrap().unwrap();
        let by_number = tracker.find_account_by_number("77").await.unwrap().unwrap();
        let listed = tracker.list_accounts().await.unwrap();
        assert_eq!(by_id.cash_on_account, dec!(70));
        assert_eq!(by_number.cash_on_account, dec!(70));
        assert_eq!(listed[0].cash_on_account, dec!(70));
    }

    #[tokio::test]
    async fn transfer_is_net_zero() {
        let tracker = PortfolioTracker::create_new();
        let a = account(&tracker, "A").await;
        let b = account(&tracker, "B").await;
        tracker.record_cash(a.id, d(2020, 1, 1), dec!(500)).await.unwrap();

        let legs = tracker
            .record_transfer(a.id, b.id, d(2020, 1, 2), dec!(200))
            .await
            .unwrap();
        assert_eq!(legs.credit.associated_cash_transaction_id, Some(legs.debit.id));
        assert_eq!(tracker.compute_account_cash_balance(a.id).await.unwrap(), dec!(300));
        assert_eq!(tracker.compute_account_cash_balance(b.id).await.unwrap(), dec!(200));
    }

    #[tokio::test]
    async fn transfer_rejects_bad_input() {
        let tracker = PortfolioTracker::create_new();
        let a = account(&tracker, "A").await;
        assert!(matches!(
            tracker.record_transfer(a.id, a.id, d(2020, 1, 2), dec!(1)).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        assert!(matches!(
            tracker.record_transfer(a.id, AccountId(404), d(2020, 1, 2), dec!(1)).await,
            Err(CoreError::UnknownReference { kind: "account", .. })
        ));
        assert!(matches!(
            tracker.record_transfer(a.id, AccountId(404), d(2020, 1, 2), dec!(-1)).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        assert!(tracker.list_transactions(TransactionFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reinvest_dividend_is_cash_neutral_and_averages_cost() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "VTI").await;
        let buy = tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 2), dec!(10), dec!(100))
            .await
            .unwrap();
        let holding_id = buy.holding_id.unwrap();
        let cash_before = tracker.compute_account_cash_balance(acct.id).await.unwrap();

        let reinvest = tracker
            .record_reinvest_dividend(holding_id, d(2020, 3, 1), dec!(10), dec!(110))
            .await
            .unwrap();
        let funding = tracker
            .store()
            .get_transaction(reinvest.associated_cash_transaction_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(funding.transaction_type, TransactionType::Dividend);
        assert_eq!(funding.dividend, Some(dec!(1100)));

        assert_eq!(tracker.compute_account_cash_balance(acct.id).await.unwrap(), cash_before);
        let holding = tracker.store().get_holding(holding_id).await.unwrap().unwrap();
        assert_eq!(holding.quantity, dec!(20));
        assert_eq!(holding.purchase_price, dec!(105));
        assert_eq!(holding.total_dividends, dec!(1100));
    }

    #[tokio::test]
    async fn split_share_transfer_and_additional_buy() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "NVDA").await;
        let holding_id = tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 2), dec!(10), dec!(400))
            .await
            .unwrap()
            .holding_id
            .unwrap();

        tracker.record_split(holding_id, d(2021, 7, 20), dec!(30)).await.unwrap();
        tracker
            .record_share_transfer(holding_id, d(2021, 8, 1), dec!(20))
            .await
            .unwrap();
        tracker
            .record_additional_buy(holding_id, d(2021, 9, 1), dec!(20), dec!(200))
            .await
            .unwrap();

        let h = tracker.store().get_holding(holding_id).await.unwrap().unwrap();
        assert_eq!(h.quantity, dec!(40));
        assert_eq!(h.purchase_price, dec!(150));
        assert!(matches!(
            tracker.record_share_transfer(holding_id, d(2021, 9, 2), dec!(41)).await,
            Err(CoreError::InsufficientQuantity { .. })
        ));
    }

    #[tokio::test]
    async fn closed_holding_is_not_reopened() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "KO").await;
        let first = tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 2), dec!(5), dec!(50))
            .await
            .unwrap()
            .holding_id
            .unwrap();
        tracker.record_sell(first, d(2020, 2, 2), dec!(5), dec!(55)).await.unwrap();

        assert!(matches!(
            tracker.record_additional_buy(first, d(2020, 3, 2), dec!(1), dec!(50)).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        let second = tracker
            .record_buy(acct.id, inv.id, d(2020, 3, 2), dec!(1), dec!(50))
            .await
            .unwrap()
            .holding_id
            .unwrap();
        assert_ne!(first, second);

        let rows = tracker
            .compute_open_holdings_report(d(2020, 3, 3), SortBy::MarketValue, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].holding_id, second);
        assert_eq!(tracker.compute_positions(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn back_dated_buy_cannot_reopen_closed_holding() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "KO").await;
        let holding_id = tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 1), dec!(10), dec!(50))
            .await
            .unwrap()
            .holding_id
            .unwrap();
        tracker
            .record_sell(holding_id, d(2020, 1, 10), dec!(10), dec!(55))
            .await
            .unwrap();
        let before = tracker
            .list_transactions(TransactionFilter::all())
            .await
            .unwrap();

        let back_dated = d(2020, 1, 5);
        assert!(matches!(
            tracker.record_additional_buy(holding_id, back_dated, dec!(5), dec!(50)).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        assert!(matches!(
            tracker.record_reinvest_dividend(holding_id, back_dated, dec!(1), dec!(50)).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        assert!(matches!(
            tracker.record_split(holding_id, back_dated, dec!(10)).await,
            Err(CoreError::MalformedTransaction(_))
        ));

        let after = tracker
            .list_transactions(TransactionFilter::all())
            .await
            .unwrap();
        assert_eq!(after, before);
        let positions = tracker.compute_positions(None).await.unwrap();
        assert!(!positions[0].is_open());
    }

    #[tokio::test]
    async fn overflowing_buy_creates_nothing() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "KO").await;
        assert!(matches!(
            tracker.record_buy(acct.id, inv.id, d(2020, 1, 1), Decimal::MAX, dec!(2)).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        assert!(tracker.store().list_holdings(None).await.unwrap().is_empty());
        assert!(tracker
            .list_transactions(TransactionFilter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cash_overflow_is_rejected_and_balance_stays_readable() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let other = account(&tracker, "2").await;
        let inv = stock(&tracker, "KO").await;
        tracker.record_cash(acct.id, d(2020, 1, 1), Decimal::MAX).await.unwrap();

        assert!(matches!(
            tracker.record_cash(acct.id, d(2020, 1, 2), Decimal::MAX).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        assert!(matches!(
            tracker
                .record_dividend(acct.id, inv.id, None, d(2020, 1, 2), dec!(1))
                .await,
            Err(CoreError::MalformedTransaction(_))
        ));
        tracker.record_cash(other.id, d(2020, 1, 1), Decimal::MAX).await.unwrap();
        assert!(matches!(
            tracker.record_transfer(other.id, acct.id, d(2020, 1, 3), dec!(1)).await,
            Err(CoreError::MalformedTransaction(_))
        ));

        assert_eq!(
            tracker.compute_account_cash_balance(acct.id).await.unwrap(),
            Decimal::MAX
        );
        let accounts = tracker.list_accounts().await.unwrap();
        assert!(accounts.iter().all(|a| a.cash_on_account == Decimal::MAX));
        assert_eq!(tracker.account_cash_history(acct.id).await.unwrap().len(), 1);

        // Withdrawals still go through.
        tracker.record_cash(acct.id, d(2020, 1, 4), dec!(-1)).await.unwrap();
        assert_eq!(
            tracker.compute_account_cash_balance(acct.id).await.unwrap(),
            Decimal::MAX - dec!(1)
        );
    }

    #[tokio::test]
    async fn unknown_references_are_rejected() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        assert!(matches!(
            tracker.record_buy(acct.id, InvestmentId(9), d(2020, 1, 1), dec!(1), dec!(1)).await,
            Err(CoreError::UnknownReference { kind: "investment", .. })
        ));
        assert!(matches!(
            tracker.record_sell(HoldingId(9), d(2020, 1, 1), dec!(1), dec!(1)).await,
            Err(CoreError::UnknownReference { kind: "holding", .. })
        ));
        assert!(matches!(
            tracker.record_cash(AccountId(9), d(2020, 1, 1), dec!(1)).await,
            Err(CoreError::UnknownReference { kind: "account", .. })
        ));
        assert!(matches!(
            tracker.compute_account_cash_balance(AccountId(9)).await,
            Err(CoreError::UnknownReference { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_buy_creates_nothing() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "KO").await;
        assert!(matches!(
            tracker.record_buy(acct.id, inv.id, d(2020, 1, 1), dec!(0), dec!(1)).await,
            Err(CoreError::MalformedTransaction(_))
        ));
        assert!(tracker.store().list_holdings(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purchase_transaction_is_the_opening_buy() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "KO").await;
        let buy = tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 2), dec!(5), dec!(50))
            .await
            .unwrap();
        let holding_id = buy.holding_id.unwrap();
        tracker.record_sell(holding_id, d(2020, 2, 2), dec!(1), dec!(55)).await.unwrap();

        let found = tracker.purchase_transaction(holding_id).await.unwrap().unwrap();
        assert_eq!(found, buy);
        let lineage = tracker
            .list_transactions(TransactionFilter::holding(holding_id))
            .await
            .unwrap();
        assert_eq!(lineage.len(), 2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Drafts, import & export
// ═══════════════════════════════════════════════════════════════════

mod drafts {
    use super::*;

    #[tokio::test]
    async fn draft_missing_fields_is_malformed() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        for draft in [
            TransactionDraft::default(),
            TransactionDraft {
                transaction_type: Some(TransactionType::Cash),
                account_id: Some(acct.id),
                trade_quantity: Some(dec!(5)),
                trade_price: Some(dec!(1)),
                ..TransactionDraft::default()
            },
            TransactionDraft {
                transaction_type: Some(TransactionType::Cash),
                account_id: Some(acct.id),
                date: Some(d(2020, 1, 1)),
                trade_quantity: Some(dec!(5)),
                ..TransactionDraft::default()
            },
        ] {
            assert!(matches!(
                tracker.record_transaction(draft).await,
                Err(CoreError::MalformedTransaction(_))
            ));
        }
    }

    #[tokio::test]
    async fn draft_dispatches_buy() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "AAPL").await;
        let buy = tracker
            .record_transaction(TransactionDraft {
                transaction_type: Some(TransactionType::Buy),
                account_id: Some(acct.id),
                investment_id: Some(inv.id),
                date: Some(d(2020, 1, 21)),
                trade_quantity: Some(dec!(100)),
                trade_price: Some(dec!(275.50)),
                ..TransactionDraft::default()
            })
            .await
            .unwrap();
        assert_eq!(buy.transaction_type, TransactionType::Buy);
        assert!(buy.holding_id.is_some());
    }

    #[tokio::test]
    async fn export_then_import_rebuilds_positions_and_cash() {
        let source = PortfolioTracker::create_new();
        let a = account(&source, "A").await;
        let b = account(&source, "B").await;
        let inv = stock(&source, "VTI").await;
        source.record_cash(a.id, d(2020, 1, 1), dec!(5000)).await.unwrap();
        let h = source
            .record_buy(a.id, inv.id, d(2020, 1, 2), dec!(10), dec!(100))
            .await
            .unwrap()
            .holding_id
            .unwrap();
        source.record_sell(h, d(2020, 2, 1), dec!(4), dec!(120)).await.unwrap();
        source
            .record_reinvest_dividend(h, d(2020, 3, 1), dec!(1), dec!(90))
            .await
            .unwrap();
        source.record_transfer(a.id, b.id, d(2020, 4, 1), dec!(250)).await.unwrap();

        let json = source
            .export_transactions_to_json(TransactionFilter::all())
            .await
            .unwrap();

        let target = PortfolioTracker::create_new();
        account(&target, "A").await;
        account(&target, "B").await;
        stock(&target, "VTI").await;
        target.import_transactions_from_json(&json).await.unwrap();

        for id in [a.id, b.id] {
            assert_eq!(
                target.compute_account_cash_balance(id).await.unwrap(),
                source.compute_account_cash_balance(id).await.unwrap()
            );
        }
        let src_pos = source.compute_positions(None).await.unwrap();
        let dst_pos = target.compute_positions(None).await.unwrap();
        assert_eq!(dst_pos.len(), src_pos.len());
        assert_eq!(dst_pos[0].quantity, src_pos[0].quantity);
        assert_eq!(dst_pos[0].purchase_price, src_pos[0].purchase_price);
        assert_eq!(
            target.list_transactions(TransactionFilter::all()).await.unwrap().len(),
            source.list_transactions(TransactionFilter::all()).await.unwrap().len()
        );
    }

    #[tokio::test]
    async fn import_is_all_or_nothing() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let json = format!(
            r#"[
                {{"transaction_type":"Cash","account_id":{id},"date":"2020-01-01","trade_quantity":"100","trade_price":"1"}},
                {{"transaction_type":"Sell","holding_id":7,"date":"2020-01-02","trade_quantity":"1","trade_price":"1"}}
            ]"#,
            id = acct.id.0
        );
        assert!(tracker.import_transactions_from_json(&json).await.is_err());
        assert!(tracker.list_transactions(TransactionFilter::all()).await.unwrap().is_empty());
        assert_eq!(tracker.compute_account_cash_balance(acct.id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_import_keeps_writes_made_alongside_it() {
        let tracker = Arc::new(PortfolioTracker::create_new());
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "VTI").await;
        quote(&tracker, &inv, d(2020, 1, 1), dec!(10)).await;

        let mut entries: Vec<String> = (1..=50)
            .map(|day| {
                format!(
                    r#"{{"transaction_type":"Cash","account_id":{},"date":"2020-02-{:02}","trade_quantity":"1","trade_price":"1"}}"#,
                    acct.id.0,
                    day % 28 + 1
                )
            })
            .collect();
        entries.push(
            r#"{"transaction_type":"Sell","holding_id":7,"date":"2020-03-01","trade_quantity":"1","trade_price":"1"}"#
                .to_string(),
        );
        let json = format!("[{}]", entries.join(","));

        let importer = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.import_transactions_from_json(&json).await })
        };
        let writer = {
            let tracker = Arc::clone(&tracker);
            let investment_id = inv.id;
            tokio::spawn(async move {
                tracker
                    .add_quote(Quote::close_only(investment_id, d(2020, 1, 2), dec!(11)))
                    .await
                    .unwrap();
                tracker
                    .create_account(NewAccount::new("Late", "2"))
                    .await
                    .unwrap()
            })
        };

        assert!(importer.await.unwrap().is_err());
        let late = writer.await.unwrap();

        assert_eq!(tracker.list_quotes(inv.id).await.unwrap().len(), 2);
        assert_eq!(
            tracker.find_account_by_number("2").await.unwrap().unwrap().id,
            late.id
        );
        assert!(tracker
            .list_transactions(TransactionFilter::all())
            .await
            .unwrap()
            .is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Reports, quotes & settings
// ═══════════════════════════════════════════════════════════════════

mod reports {
    use super::*;

    #[tokio::test]
    async fn missing_quote_reports_none() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "AAPL").await;
        tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 21), dec!(100), dec!(275.50))
            .await
            .unwrap();
        quote(&tracker, &inv, d(2020, 1, 25), dec!(280)).await;

        let rows = tracker
            .compute_open_holdings_report(d(2020, 1, 22), SortBy::ChangeInValue, SortOrder::Asc)
            .await
            .unwrap();
        assert_eq!(rows[0].market_value, None);
        assert_eq!(rows[0].change_in_value, None);
        assert_eq!(rows[0].value_at_purchase, dec!(27550.00));
    }

    #[tokio::test]
    async fn report_as_of_ignores_later_trades() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = stock(&tracker, "AAPL").await;
        let h = tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 2), dec!(10), dec!(1))
            .await
            .unwrap()
            .holding_id
            .unwrap();
        tracker.record_sell(h, d(2020, 6, 1), dec!(10), dec!(2)).await.unwrap();
        let march = tracker
            .compute_open_holdings_report(d(2020, 3, 1), SortBy::MarketValue, SortOrder::Desc)
            .await
            .unwrap();
        let july = tracker
            .compute_open_holdings_report(d(2020, 7, 1), SortBy::MarketValue, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(march.len(), 1);
        assert!(july.is_empty());
    }

    #[tokio::test]
    async fn quote_upsert_replaces_same_date() {
        let tracker = PortfolioTracker::create_new();
        let inv = stock(&tracker, "AAPL").await;
        let day = d(2020, 1, 2);
        assert!(tracker
            .add_quote(Quote::close_only(inv.id, day, dec!(1)))
            .await
            .unwrap()
            .is_none());
        let replaced = tracker
            .add_quotes(vec![
                Quote::close_only(inv.id, day, dec!(2)),
                Quote::close_only(inv.id, d(2020, 1, 3), dec!(3)),
            ])
            .await
            .unwrap();
        assert_eq!(replaced, 1);
        let quotes = tracker.list_quotes(inv.id).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].close, dec!(2));
        assert_eq!(
            tracker.latest_quote(inv.id, d(2020, 1, 9)).await.unwrap().unwrap().close,
            dec!(3)
        );
    }

    #[tokio::test]
    async fn type_sector_and_rollup() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let inv = tracker
            .create_investment(
                NewInvestment::new("VNQ", "Vanguard Real Estate", InvestmentType::Reit)
                    .with_sector("Real Estate"),
            )
            .await
            .unwrap();
        tracker
            .record_buy(acct.id, inv.id, d(2020, 1, 2), dec!(10), dec!(80))
            .await
            .unwrap();
        quote(&tracker, &inv, d(2020, 1, 2), dec!(80)).await;
        quote(&tracker, &inv, d(2020, 1, 3), dec!(82)).await;

        let rows = tracker.compute_type_sector_report(d(2020, 1, 3)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].investment_type, InvestmentType::Reit);
        assert_eq!(rows[0].market_value, Some(dec!(820)));

        let points = tracker
            .compute_portfolio_rollup(d(2020, 1, 1), d(2020, 1, 31))
            .await
            .unwrap();
        let values: Vec<Decimal> = points.iter().map(|p| p.market_value).collect();
        assert_eq!(values, vec![dec!(800), dec!(820)]);
    }

    #[tokio::test]
    async fn investment_change_and_sector_summary() {
        let tracker = PortfolioTracker::create_new();
        let a = account(&tracker, "A").await;
        let b = account(&tracker, "B").await;
        let vti = tracker
            .create_investment(
                NewInvestment::new("VTI", "Total Market", InvestmentType::Etf).with_sector("Blend"),
            )
            .await
            .unwrap();
        let ko = tracker
            .create_investment(
                NewInvestment::new("KO", "Coca-Cola", InvestmentType::Stock)
                    .with_sector("Consumer Staples"),
            )
            .await
            .unwrap();
        for acct in [a.id, b.id] {
            tracker
                .record_buy(acct, vti.id, d(2020, 1, 2), dec!(10), dec!(100))
                .await
                .unwrap();
        }
        tracker
            .record_buy(a.id, ko.id, d(2020, 1, 2), dec!(20), dec!(50))
            .await
            .unwrap();
        quote(&tracker, &vti, d(2020, 1, 3), dec!(110)).await;
        quote(&tracker, &ko, d(2020, 1, 6), dec!(45)).await;

        let changes = tracker
            .compute_investment_change_report(d(2020, 1, 6))
            .await
            .unwrap();
        let symbols: Vec<&str> = changes.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["KO", "VTI"]);
        assert_eq!(changes[0].change_in_value, Some(dec!(-100)));
        assert_eq!(changes[1].holdings, 2);
        assert_eq!(changes[1].quantity, dec!(20));
        assert_eq!(changes[1].value_at_purchase, dec!(2000));
        assert_eq!(changes[1].market_value, Some(dec!(2200)));
        assert_eq!(changes[1].quote_date, Some(d(2020, 1, 3)));

        let sectors = tracker.compute_sector_summary(None).await.unwrap();
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].sector.as_deref(), Some("Blend"));
        assert_eq!(sectors[0].change_in_value, Some(dec!(200)));
        assert_eq!(sectors[1].sector.as_deref(), Some("Consumer Staples"));
        assert_eq!(sectors[1].market_value, Some(dec!(900)));
        assert_eq!(sectors[1].quote_date, Some(d(2020, 1, 6)));

        let early = tracker.compute_sector_summary(Some(d(2020, 1, 4))).await.unwrap();
        assert_eq!(early[1].market_value, None);
        assert_eq!(early[1].unquoted_holdings, 1);
    }

    #[tokio::test]
    async fn investment_rollup_values_one_investment() {
        let tracker = PortfolioTracker::create_new();
        let acct = account(&tracker, "1").await;
        let vti = stock(&tracker, "VTI").await;
        let ko = stock(&tracker, "KO").await;
        tracker
            .record_buy(acct.id, vti.id, d(2020, 1, 2), dec!(10), dec!(100))
            .await
            .unwrap();
        tracker
            .record_buy(acct.id, ko.id, d(2020, 1, 2), dec!(20), dec!(50))
            .await
            .unwrap();
        quote(&tracker, &vti, d(2020, 1, 3), dec!(110)).await;
        quote(&tracker, &ko, d(2020, 1, 6), dec!(45)).await;

        let points = tracker
            .compute_investment_rollup(ko.id, d(2020, 1, 1), d(2020, 1, 31))
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].date, d(2020, 1, 6));
        assert_eq!(points[0].market_value, dec!(900));
        assert_eq!(points[0].value_at_purchase, dec!(1000));

        let all = tracker
            .compute_portfolio_rollup(d(2020, 1, 1), d(2020, 1, 31))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].market_value, dec!(2000));

        assert!(matches!(
            tracker
                .compute_investment_rollup(InvestmentId(99), d(2020, 1, 1), d(2020, 1, 31))
                .await,
            Err(CoreError::UnknownReference { kind: "investment", .. })
        ));
    }

    #[tokio::test]
    async fn configured_bucket_rules_from_settings() {
        let mut tracker = PortfolioTracker::create_new();
        let mut settings = Settings::default();
        settings.bucket_rules = vec![BucketRuleEntry::new(
            BucketMatcher::InvestmentType(InvestmentType::Bond),
            BucketId::Bucket1,
        )];
        tracker.set_settings(settings).unwrap();

        let acct = account(&tracker, "1").await;
        let bnd = tracker
            .create_investment(NewInvestment::new("BND", "Total Bond", InvestmentType::Bond))
            .await
            .unwrap();
        tracker
            .record_buy(acct.id, bnd.id, d(2020, 1, 2), dec!(10), dec!(80))
            .await
            .unwrap();
        quote(&tracker, &bnd, d(2020, 1, 2), dec!(81)).await;

        let summary = tracker.compute_bucket_summary(Some(d(2020, 1, 2))).await.unwrap();
        assert_eq!(summary.amount(BucketId::Bucket1), dec!(810));
        assert_eq!(summary.amount(BucketId::Unclassified), Decimal::ZERO);
    }

    #[tokio::test]
    async fn history_filters_by_date() {
        let tracker = PortfolioTracker::create_new();
        for day in [1, 2, 3] {
            tracker.snapshot_bucket_summary(d(2020, 1, day)).await.unwrap();
        }
        let history = tracker
            .bucket_summary_history(Some(d(2020, 1, 2)), None)
            .await
            .unwrap();
        let dates: Vec<NaiveDate> = history.iter().map(|s| s.summation_date).collect();
        assert_eq!(dates, vec![d(2020, 1, 2), d(2020, 1, 3)]);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let mut tracker = PortfolioTracker::create_new();
        assert!(tracker.set_fetch_timeout_ms(Some(0)).is_err());
        assert_eq!(tracker.settings().fetch_timeout_ms, Some(5_000));
        tracker.set_fetch_timeout_ms(None).unwrap();
        assert!(tracker.settings().fetch_timeout().is_none());
    }

    #[tokio::test]
    async fn duplicate_natural_keys() {
        let tracker = PortfolioTracker::create_new();
        account(&tracker, "123").await;
        stock(&tracker, "AAPL").await;
        assert!(matches!(
            tracker.create_account(NewAccount::new("Again", "123")).await,
            Err(CoreError::DuplicateKey(_))
        ));
        assert!(matches!(
            tracker
                .create_investment(NewInvestment::new("aapl", "Apple", InvestmentType::Stock))
                .await,
            Err(CoreError::DuplicateKey(_))
        ));
        assert!(matches!(
            tracker
                .create_investment(NewInvestment::new("  ", "Blank", InvestmentType::Stock))
                .await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn investment_edit_keeps_identity() {
        let tracker = PortfolioTracker::create_new();
        let mut inv = stock(&tracker, "AAPL").await;
        inv.sector = Some("Technology".into());
        inv.investment_type = InvestmentType::Etf;
        let updated = tracker.update_investment(inv.clone()).await.unwrap();
        assert_eq!(updated.sector.as_deref(), Some("Technology"));
        assert_eq!(
            tracker.find_investment_by_symbol("aapl").await.unwrap().unwrap().investment_type,
            InvestmentType::Etf
        );

        inv.symbol = "MSFT".into();
        assert!(matches!(
            tracker.update_investment(inv).await,
            Err(CoreError::ValidationError(_))
        ));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Fetch deadline
// ═══════════════════════════════════════════════════════════════════

/// Delegates to a `MemoryStore` but stalls every ledger read.
struct SlowLedger {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl LedgerStore for SlowLedger {
    async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, CoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_transactions(filter).await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, CoreError> {
        self.inner.get_transaction(id).await
    }

    async fn append_transaction(&self, entry: NewTransaction) -> Result<Transaction, CoreError> {
        self.inner.append_transaction(entry).await
    }
}

#[async_trait]
impl QuoteStore for SlowLedger {
    async fn latest_quote_on_or_before(
        &self,
        investment_id: InvestmentId,
        date: NaiveDate,
    ) -> Result<Option<Quote>, CoreError> {
        self.inner.latest_quote_on_or_before(investment_id, date).await
    }

    async fn list_quotes(&self, investment_id: InvestmentId) -> Result<Vec<Quote>, CoreError> {
        self.inner.list_quotes(investment_id).await
    }

    async fn upsert_quote(&self, quote: Quote) -> Result<Option<Quote>, CoreError> {
        self.inner.upsert_quote(quote).await
    }
}

#[async_trait]
impl AccountStore for SlowLedger {
    async fn create_account(&self, new_account: NewAccount) -> Result<Account, CoreError> {
        self.inner.create_account(new_account).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, CoreError> {
        self.inner.get_account(id).await
    }

    async fn find_account_by_number(&self, number: &str) -> Result<Option<Account>, CoreError> {
        self.inner.find_account_by_number(number).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        self.inner.list_accounts().await
    }

    async fn update_account(&self, account: Account) -> Result<Account, CoreError> {
        self.inner.update_account(account).await
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool, CoreError> {
        self.inner.delete_account(id).await
    }
}

#[async_trait]
impl InvestmentStore for SlowLedger {
    async fn create_investment(&self, new: NewInvestment) -> Result<Investment, CoreError> {
        self.inner.create_investment(new).await
    }

    async fn get_investment(&self, id: InvestmentId) -> Result<Option<Investment>, CoreError> {
        self.inner.get_investment(id).await
    }

    async fn find_investment_by_symbol(&self, symbol: &str) -> Result<Option<Investment>, CoreError> {
        self.inner.find_investment_by_symbol(symbol).await
    }

    async fn list_investments(&self) -> Result<Vec<Investment>, CoreError> {
        self.inner.list_investments().await
    }

    async fn update_investment(&self, investment: Investment) -> Result<Investment, CoreError> {
        self.inner.update_investment(investment).await
    }

    async fn delete_investment(&self, id: InvestmentId) -> Result<bool, CoreError> {
        self.inner.delete_investment(id).await
    }
}

#[async_trait]
impl HoldingStore for SlowLedger {
    async fn create_holding(
        &self,
        account_id: AccountId,
        investment_id: InvestmentId,
        purchase_date: NaiveDate,
        purchase_price: Decimal,
    ) -> Result<Holding, CoreError> {
        self.inner
            .create_holding(account_id, investment_id, purchase_date, purchase_price)
            .await
    }

    async fn get_holding(&self, id: HoldingId) -> Result<Option<Holding>, CoreError> {
        self.inner.get_holding(id).await
    }

    async fn list_holdings(&self, account_id: Option<AccountId>) -> Result<Vec<Holding>, CoreError> {
        self.inner.list_holdings(account_id).await
    }

    async fn save_holding(&self, holding: Holding) -> Result<Holding, CoreError> {
        self.inner.save_holding(holding).await
    }

    async fn delete_holding(&self, id: HoldingId) -> Result<bool, CoreError> {
        self.inner.delete_holding(id).await
    }
}

#[async_trait]
impl BucketSnapshotStore for SlowLedger {
    async fn find_summation(&self, date: NaiveDate) -> Result<Option<BucketSummation>, CoreError> {
        self.inner.find_summation(date).await
    }

    async fn insert_summation(&self, s: BucketSummation) -> Result<BucketSummation, CoreError> {
        self.inner.insert_summation(s).await
    }

    async fn update_summation(
        &self,
        s: BucketSummation,
        expected_version: u64,
    ) -> Result<BucketSummation, CoreError> {
        self.inner.update_summation(s, expected_version).await
    }

    async fn list_summations(&self) -> Result<Vec<BucketSummation>, CoreError> {
        self.inner.list_summations().await
    }
}

mod deadline {
    use super::*;

    fn slow_tracker(timeout_ms: Option<u64>) -> PortfolioTracker<SlowLedger> {
        let store = SlowLedger {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(200),
        };
        let settings = Settings {
            fetch_timeout_ms: timeout_ms,
            ..Settings::default()
        };
        PortfolioTracker::with_settings(store, settings).unwrap()
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let tracker = slow_tracker(Some(20));
        let result = tracker
            .compute_open_holdings_report(d(2020, 1, 1), SortBy::MarketValue, SortOrder::Desc)
            .await;
        assert!(matches!(result, Err(CoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn disabled_deadline_waits() {
        let tracker = slow_tracker(None);
        let rows = tracker
            .compute_open_holdings_report(d(2020, 1, 1), SortBy::MarketValue, SortOrder::Desc)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn tracker_is_shareable_across_tasks() {
        let tracker = Arc::new(PortfolioTracker::create_new());
        let acct = account(&tracker, "1").await;
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    tracker
                        .record_cash(acct.id, d(2020, 1, 1 + i), Decimal::from(10))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(tracker.compute_account_cash_balance(acct.id).await.unwrap(), dec!(80));
    }
}
