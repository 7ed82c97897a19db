use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Serialization failure: {0}")]
    Serialization(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("Lock poisoned")]
    LockError,
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::Storage(error.to_string())
    }
}

impl From<concord_signer::SignerError> for LedgerError {
    fn from(error: concord_signer::SignerError) -> Self {
        LedgerError::SigningUnavailable(error.to_string())
    }
}
