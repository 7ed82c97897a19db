//! Team members and their signing identities.

use std::sync::Arc;

use concord_signer::SigningCapability;
use concord_types::{MemberId, Role, TrustTensor, ValueTensor};

/// A member's signing identity, resolved once at admission. Hardware and
/// software providers implement the same capability; nothing downstream
/// re-discovers which kind it holds.
#[derive(Clone)]
pub enum SigningHandle {
    Software(Arc<dyn SigningCapability>),
    Hardware(Arc<dyn SigningCapability>),
}

impl SigningHandle {
    pub fn capability(&self) -> &dyn SigningCapability {
        match self {
            SigningHandle::Software(cap) | SigningHandle::Hardware(cap) => cap.as_ref(),
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, SigningHandle::Hardware(_))
    }
}

impl std::fmt::Debug for SigningHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningHandle::Software(_) => write!(f, "SigningHandle::Software"),
            SigningHandle::Hardware(_) => write!(f, "SigningHandle::Hardware"),
        }
    }
}

/// One governed identity. Role is fixed at admission; reputation tensors
/// evolve with every completed action.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: String,
    pub member_id: MemberId,
    pub role: Role,
    pub handle: SigningHandle,
    pub t3: TrustTensor,
    pub v3: ValueTensor,
}

impl Member {
    pub fn new(name: impl Into<String>, role: Role, handle: SigningHandle) -> Self {
        let name = name.into();
        Self {
            member_id: MemberId::new(name.clone()),
            name,
            role,
            handle,
            t3: TrustTensor::default(),
            v3: ValueTensor::default(),
        }
    }
}
