//! Concord Signer - the signing and attestation capability boundary.
//!
//! The governance core never implements or verifies cryptography itself; it
//! consumes these capabilities. Hardware-backed providers (TPM2, TrustZone)
//! live outside this workspace and implement the same traits.
#![deny(unsafe_code)]

use ed25519_dalek::{Signer as DalekSigner, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("Attestation unavailable: {0}")]
    AttestationUnavailable(String),
}

/// Capability to sign ledger entries and bridge nonces.
pub trait SigningCapability: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError>;

    fn public_key(&self) -> Vec<u8>;

    /// True when the key never leaves a hardware boundary. Ledger entries
    /// signed this way carry `hw_signed = true`.
    fn is_hardware_backed(&self) -> bool;
}

/// Optional capability to annotate records with a platform attestation.
/// Absence degrades gracefully; it never fails a core operation.
pub trait AttestationCapability: Send + Sync {
    fn get_attestation(&self) -> Result<AttestationToken, SignerError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationToken {
    pub provider: String,
    pub quote: Vec<u8>,
}

/// Ed25519 software signer for development mode and simulated identities.
/// The secret key zeroizes on drop.
pub struct SoftwareSigner {
    verifying_key: VerifyingKey,
    signing_key: SigningKey,
}

impl SoftwareSigner {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            verifying_key,
            signing_key,
        }
    }

    /// Deterministic signer derived from a seed label. Test identities only.
    pub fn from_seed_label(label: &str) -> Self {
        let seed = Zeroizing::new(*blake3::hash(label.as_bytes()).as_bytes());
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            verifying_key,
            signing_key,
        }
    }
}

impl SigningCapability for SoftwareSigner {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(payload).to_bytes().to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.verifying_key.to_bytes().to_vec()
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }
}

/// Attestation stub for environments without a hardware root. Produces a
/// clearly-labelled simulated token rather than failing.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedAttestation;

impl AttestationCapability for SimulatedAttestation {
    fn get_attestation(&self) -> Result<AttestationToken, SignerError> {
        Ok(AttestationToken {
            provider: "simulated".to_string(),
            quote: Vec::new(),
        })
    }
}
