use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A brokerage or retirement account holding positions and cash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub company: Option<String>,

    /// External lookup key, unique across accounts.
    pub account_number: String,

    #[serde(default)]
    pub account_type: Option<String>,

    /// Cash position derived from the ledger. Whatever the store holds
    /// here is a cache; the tracker overwrites it on every read.
    #[serde(default)]
    pub cash_on_account: Decimal,
}

/// Input for creating an account; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    pub account_number: String,
    #[serde(default)]
    pub account_type: Option<String>,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, account_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            company: None,
            account_number: account_number.into().trim().to_string(),
            account_type: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_account_type(mut self, account_type: impl Into<String>) -> Self {
        self.account_type = Some(account_type.into());
        self
    }

    pub(crate) fn into_account(self, id: AccountId) -> Account {
        Account {
            id,
            name: self.name,
            owner: self.owner,
            company: self.company,
            account_number: self.account_number.trim().to_string(),
            account_type: self.account_type,
            cash_on_account: Decimal::ZERO,
        }
    }
}
