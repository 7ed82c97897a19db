use concord_types::Role;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("Authorization denied: {reason}")]
    AuthorizationDenied {
        reason: String,
        required_role: Option<Role>,
    },

    #[error("Unknown member: {name}")]
    UnknownMember { name: String },

    #[error("Member already admitted: {name}")]
    MemberExists { name: String },

    #[error("Insufficient ATP: have {available}, need {required}")]
    InsufficientResource { available: f64, required: f64 },

    #[error("Birth certificate tampered for '{entity}'")]
    CertificateTampered { entity: String },

    #[error("Ledger failure: {0}")]
    Ledger(#[from] concord_ledger::LedgerError),

    #[error("Policy failure: {0}")]
    Policy(#[from] concord_policy::PolicyError),

    #[error("Multi-sig failure: {0}")]
    MultiSig(#[from] concord_multisig::MultiSigError),

    #[error("Heartbeat failure: {0}")]
    Heartbeat(#[from] concord_heartbeat::HeartbeatError),

    #[error("Signing unavailable: {0}")]
    SigningUnavailable(#[from] concord_signer::SignerError),

    #[error("State I/O failure: {0}")]
    Io(String),

    #[error("State serialization failure: {0}")]
    Serialization(String),

    #[error("Lock poisoned")]
    LockError,
}

impl From<std::io::Error> for TeamError {
    fn from(error: std::io::Error) -> Self {
        TeamError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for TeamError {
    fn from(error: serde_json::Error) -> Self {
        TeamError::Serialization(error.to_string())
    }
}
