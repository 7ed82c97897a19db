//! Deterministic reputation updates from action outcomes.
//!
//! Every completed action (approved or denied) moves the actor's tensors by
//! an exponential moving average. Higher-cost actions carry a stronger
//! signal, scaled within a bounded multiplier, so replaying the ledger
//! reproduces identical trust values.

use concord_types::{ReputationRecord, TrustTensor, ValueTensor};

/// Base learning rate for the EMA.
pub const BASE_ALPHA: f64 = 0.1;

/// Quality attributed to an approved action.
pub const SUCCESS_QUALITY: f64 = 0.7;

/// Quality attributed to a denied action.
pub const DENIAL_QUALITY: f64 = 0.3;

/// Cost-derived signal strength, bounded so no single action dominates.
pub fn cost_multiplier(atp_cost: f64) -> f64 {
    (atp_cost / 25.0).clamp(0.5, 2.0)
}

/// Apply one outcome to a member's tensors, returning the auditable
/// before/after record for the ledger entry.
pub fn apply_outcome(
    t3: &mut TrustTensor,
    v3: &mut ValueTensor,
    success: bool,
    atp_cost: f64,
) -> ReputationRecord {
    let alpha = BASE_ALPHA * cost_multiplier(atp_cost);
    let quality = if success { SUCCESS_QUALITY } else { DENIAL_QUALITY };

    let t3_before = *t3;
    let v3_before = *v3;

    t3.apply_outcome(success, quality, alpha);
    let value_created = if success { quality * 0.8 } else { 0.1 };
    v3.apply_outcome(value_created, success, alpha);

    ReputationRecord {
        t3_before,
        t3_after: *t3,
        v3_before,
        v3_after: *v3,
        net_trust_change: t3.composite() - t3_before.composite(),
        net_value_change: v3.composite() - v3_before.composite(),
    }
}
