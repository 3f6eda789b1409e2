use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::CoreError;

use super::account::Account;
use super::bucket::BucketSummation;
use super::holding::Holding;
use super::investment::{Investment, InvestmentId};
use super::quote::QuoteSeries;
use super::settings::Settings;
use super::transaction::Transaction;

/// Id sequences of the store. Each counter holds the last id handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    pub account: i64,
    pub investment: i64,
    pub holding: i64,
    pub transaction: i64,
}

/// The main data container. Everything in here gets serialized into the
/// portable portfolio file.
///
/// The ledger (`transactions`) is the only source of truth for positions
/// and cash; `holdings` rows and `Account::cash_on_account` are caches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioData {
    pub accounts: Vec<Account>,
    pub investments: Vec<Investment>,
    pub holdings: Vec<Holding>,

    /// Append-only ledger in insertion (id) order.
    pub transactions: Vec<Transaction>,

    pub quotes: BTreeMap<InvestmentId, QuoteSeries>,

    /// Bucket snapshots, one per date.
    pub bucket_summations: Vec<BucketSummation>,

    pub settings: Settings,

    #[serde(default)]
    pub sequences: Sequences,
}

impl PortfolioData {
    pub fn total_quotes(&self) -> usize {
        self.quotes.values().map(|s| s.len()).sum()
    }

    /// Bring data read from outside back to what the store relies on.
    ///
    /// Each id sequence is raised to at least the highest id stored under
    /// it, the ledger is put back in id order and every quote series is
    /// re-sorted by date. Exhausted sequences and quotes filed under another
    /// investment are rejected.
    pub fn normalize(&mut self) -> Result<(), CoreError> {
        let sequences = [
            (
                "account",
                &mut self.sequences.account,
                self.accounts.iter().map(|a| a.id.0).max(),
            ),
            (
                "investment",
                &mut self.sequences.investment,
                self.investments.iter().map(|i| i.id.0).max(),
            ),
            (
                "holding",
                &mut self.sequences.holding,
                self.holdings.iter().map(|h| h.id.0).max(),
            ),
            (
                "transaction",
                &mut self.sequences.transaction,
                self.transactions.iter().map(|t| t.id.0).max(),
            ),
        ];
        for (name, sequence, highest) in sequences {
            let highest = highest.unwrap_or(0);
            if highest > *sequence {
                log::warn!("Raising {name} id sequence from {sequence} to {highest}");
                *sequence = highest;
            }
            if *sequence == i64::MAX {
                return Err(CoreError::InvalidFileFormat(format!(
                    "{name} ids are exhausted"
                )));
            }
        }

        self.transactions.sort_by_key(|t| t.id);
        for (investment_id, series) in &mut self.quotes {
            if let Some(stray) = series
                .as_slice()
                .iter()
                .find(|q| q.investment_id != *investment_id)
            {
                return Err(CoreError::InvalidFileFormat(format!(
                    "quote of investment {} filed under investment {investment_id}",
                    stray.investment_id
                )));
            }
            *series = QuoteSeries::from_quotes(series.as_slice().to_vec());
        }
        Ok(())
    }
}
