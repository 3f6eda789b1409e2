use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an investment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvestmentId(pub i64);

impl std::fmt::Display for InvestmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of security an investment represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InvestmentType {
    Stock,
    #[serde(rename = "ETF")]
    Etf,
    MutualFund,
    Bond,
    #[serde(rename = "REIT")]
    Reit,
    #[serde(rename = "CD")]
    Cd,
    Crypto,
    Cash,
}

impl InvestmentType {
    /// Human-readable label used in reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            InvestmentType::Stock => "Stock",
            InvestmentType::Etf => "ETF",
            InvestmentType::MutualFund => "Mutual Fund",
            InvestmentType::Bond => "Bond",
            InvestmentType::Reit => "Real Estate Investment Trust",
            InvestmentType::Cd => "Certificate of Deposit",
            InvestmentType::Crypto => "Crypto",
            InvestmentType::Cash => "Cash",
        }
    }
}

impl std::fmt::Display for InvestmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A tradable security, identified by its unique ticker symbol.
///
/// Identity (`id`, `symbol`) never changes once created; sector and
/// type may be edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,

    /// Ticker symbol, uppercased (e.g., "AAPL", "VTI")
    pub symbol: String,

    pub company_name: String,

    #[serde(default)]
    pub exchange: Option<String>,

    #[serde(default)]
    pub sector: Option<String>,

    pub investment_type: InvestmentType,
}

/// Input for creating an investment; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvestment {
    pub symbol: String,
    pub company_name: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    pub investment_type: InvestmentType,
}

impl NewInvestment {
    pub fn new(
        symbol: impl Into<String>,
        company_name: impl Into<String>,
        investment_type: InvestmentType,
    ) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            company_name: company_name.into(),
            exchange: None,
            sector: None,
            investment_type,
        }
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub(crate) fn into_investment(self, id: InvestmentId) -> Investment {
        Investment {
            id,
            symbol: self.symbol.trim().to_uppercase(),
            company_name: self.company_name,
            exchange: self.exchange,
            sector: self.sector,
            investment_type: self.investment_type,
        }
    }
}
