use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::holding::HoldingId;

/// Unified error type for the entire portfolio-tracker-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Ledger ──────────────────────────────────────────────────────
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("Insufficient quantity in holding {holding_id}: requested {requested}, available {available}")]
    InsufficientQuantity {
        holding_id: HoldingId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Unknown {kind} reference: {id}")]
    UnknownReference { kind: &'static str, id: String },

    #[error("Bucket snapshot for {0} was written concurrently, re-read and retry")]
    SnapshotConflict(NaiveDate),

    #[error("Arithmetic overflow computing {0}")]
    Overflow(String),

    // ── Business Logic ──────────────────────────────────────────────
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Store fetch timed out: {0}")]
    Timeout(String),

    // ── Storage / File ──────────────────────────────────────────────
    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Unsupported file version: {0}")]
    UnsupportedVersion(u16),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),
}

impl CoreError {
    pub(crate) fn unknown(kind: &'static str, id: impl std::fmt::Display) -> Self {
        CoreError::UnknownReference {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn overflow(what: impl std::fmt::Display) -> Self {
        CoreError::Overflow(what.to_string())
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}
