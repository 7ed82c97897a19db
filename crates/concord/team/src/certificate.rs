//! Birth certificates: immutable, hash-verified genesis records binding a
//! member to a team under a specific policy version.

use std::path::Path;

use chrono::{DateTime, Utc};
use concord_types::{MemberId, Role, TeamId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TeamError;

/// Rights granted at admission, by role.
pub fn initial_rights(role: Role) -> Vec<String> {
    let rights: &[&str] = match role {
        Role::Admin => &["manage_members", "manage_policy", "execute_actions", "read_ledger"],
        Role::Operator => &["execute_actions", "deploy", "read_ledger"],
        Role::Agent => &["execute_actions", "read_ledger"],
        Role::Viewer => &["read_ledger"],
    };
    rights.iter().map(|r| r.to_string()).collect()
}

/// Responsibilities accepted at admission, by role.
pub fn initial_responsibilities(role: Role) -> Vec<String> {
    let duties: &[&str] = match role {
        Role::Admin => &["uphold_policy", "witness_admissions", "steward_resources"],
        Role::Operator => &["uphold_policy", "report_outcomes"],
        Role::Agent => &["uphold_policy", "report_outcomes"],
        Role::Viewer => &["uphold_policy"],
    };
    duties.iter().map(|d| d.to_string()).collect()
}

/// Issued exactly once per member and never mutated. `cert_hash` covers
/// every other field; a loaded certificate whose stored hash disagrees with
/// the recomputed one is tampered and must not be treated as valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BirthCertificate {
    pub entity_id: MemberId,
    pub entity_name: String,
    pub citizen_role: Role,
    pub society_id: TeamId,
    pub law_oracle_id: MemberId,
    pub law_version: u32,
    pub birth_timestamp: DateTime<Utc>,
    pub witnesses: Vec<MemberId>,
    pub genesis_block_ref: String,
    pub initial_rights: Vec<String>,
    pub initial_responsibilities: Vec<String>,
    pub binding_type: String,
    pub cert_hash: String,
}

impl BirthCertificate {
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        entity_name: impl Into<String>,
        citizen_role: Role,
        society_id: TeamId,
        law_oracle_id: MemberId,
        law_version: u32,
        birth_timestamp: DateTime<Utc>,
        witnesses: Vec<MemberId>,
        genesis_block_ref: impl Into<String>,
        binding_type: impl Into<String>,
    ) -> Self {
        let entity_name = entity_name.into();
        let mut cert = Self {
            entity_id: MemberId::new(entity_name.clone()),
            entity_name,
            citizen_role,
            society_id,
            law_oracle_id,
            law_version,
            birth_timestamp,
            witnesses,
            genesis_block_ref: genesis_block_ref.into(),
            initial_rights: initial_rights(citizen_role),
            initial_responsibilities: initial_responsibilities(citizen_role),
            binding_type: binding_type.into(),
            cert_hash: String::new(),
        };
        cert.cert_hash = cert.compute_hash();
        cert
    }

    pub fn compute_hash(&self) -> String {
        let mut canonical = self.clone();
        canonical.cert_hash = String::new();
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"concord-birth-cert-v1:");
        hasher.update(&encoded);
        hasher.finalize().to_hex().to_string()
    }

    pub fn verify(&self) -> bool {
        self.cert_hash == self.compute_hash()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TeamError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Load and hash-check. A tampered certificate is flagged, not deleted.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TeamError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let cert: Self = serde_json::from_str(&raw)?;
        if !cert.verify() {
            warn!(
                entity = %cert.entity_name,
                path = %path.as_ref().display(),
                "Birth certificate failed hash verification"
            );
            return Err(TeamError::CertificateTampered {
                entity: cert.entity_name,
            });
        }
        Ok(cert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cert() -> BirthCertificate {
        BirthCertificate::issue(
            "sage-agent",
            Role::Agent,
            TeamId::new("alpha"),
            MemberId::new("admin-root"),
            1,
            Utc::now(),
            vec![MemberId::new("admin-root"), MemberId::new("root")],
            "0000000000000000",
            "software",
        )
    }

    #[test]
    fn issued_certificate_verifies() {
        assert!(sample_cert().verify());
    }

    #[test]
    fn role_promotion_after_issue_is_detected() {
        let mut cert = sample_cert();
        cert.citizen_role = Role::Admin;
        assert!(!cert.verify());
    }

    #[test]
    fn any_field_flip_is_detected() {
        let mut cert = sample_cert();
        cert.law_version = 2;
        assert!(!cert.verify());

        let mut cert = sample_cert();
        cert.witnesses.pop();
        assert!(!cert.verify());

        let mut cert = sample_cert();
        cert.initial_rights.push("manage_policy".to_string());
        assert!(!cert.verify());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certs/sage-agent.json");
        let cert = sample_cert();
        cert.save(&path).unwrap();
        let loaded = BirthCertificate::load(&path).unwrap();
        assert_eq!(cert, loaded);
    }

    #[test]
    fn tampered_file_is_flagged_but_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sage-agent.json");
        sample_cert().save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let tampered = raw.replace("\"citizen_role\": \"agent\"", "\"citizen_role\": \"admin\"");
        std::fs::write(&path, tampered).unwrap();

        let err = BirthCertificate::load(&path).unwrap_err();
        assert!(matches!(err, TeamError::CertificateTampered { .. }));
        assert!(path.exists());
    }
}
