use std::path::Path;

use crate::errors::CoreError;
use crate::models::portfolio::PortfolioData;

use super::format;

/// High-level storage operations: save/load portfolio data to/from bytes or files.
pub struct StorageManager;

impl StorageManager {
    /// Serialize portfolio data to raw bytes (portable, platform-independent).
    ///
    /// Flow: PortfolioData → bincode → PFTK format bytes
    pub fn save_to_bytes(data: &PortfolioData) -> Result<Vec<u8>, CoreError> {
        let payload = bincode::serialize(data)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize portfolio: {e}")))?;
        log::debug!(
            "Serialized {} transactions and {} quotes into {} bytes",
            data.transactions.len(),
            data.total_quotes(),
            payload.len()
        );
        Ok(format::write_file(format::CURRENT_VERSION, &payload))
    }

    /// Deserialize portfolio data from raw bytes.
    ///
    /// Flow: PFTK bytes → parse header → bincode → PortfolioData, then
    /// settings validated and sequences/quote order normalized.
    pub fn load_from_bytes(bytes: &[u8]) -> Result<PortfolioData, CoreError> {
        let (_header, payload) = format::read_file(bytes)?;
        let mut data: PortfolioData = bincode::deserialize(payload).map_err(|e| {
            CoreError::Deserialization(format!("Failed to deserialize portfolio: {e}"))
        })?;
        data.settings.validate()?;
        data.normalize()?;
        Ok(data)
    }

    pub fn save_to_file(data: &PortfolioData, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let bytes = Self::save_to_bytes(data)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<PortfolioData, CoreError> {
        let bytes = std::fs::read(path)?;
        Self::load_from_bytes(&bytes)
    }
}
