//! Reference charge policies.
//!
//! The reconciler never compares caps itself; these are the stock
//! answers a host can wire in. [`CapPolicy`] is the strict option:
//! hard-reject anything over either contractual cap. It is provided but
//! never wired in by default.

use async_trait::async_trait;

use crate::callback::{ChargePolicy, ChargeReview};

/// Approves every charge. Useful for tests and fully-trusting hosts.
pub struct ApproveAll;

#[async_trait]
impl ChargePolicy for ApproveAll {
    async fn authorize(&self, _review: &ChargeReview) -> bool {
        true
    }
}

/// Declines every charge. Useful for tests and dry runs.
pub struct DenyAll;

#[async_trait]
impl ChargePolicy for DenyAll {
    async fn authorize(&self, _review: &ChargeReview) -> bool {
        false
    }
}

/// Hard-enforces both contractual caps: the charge must not exceed the
/// per-charge cap, and the period total including this charge must not
/// exceed the per-period cap.
pub struct CapPolicy;

#[async_trait]
impl ChargePolicy for CapPolicy {
    async fn authorize(&self, review: &ChargeReview) -> bool {
        review.charge_amount <= review.max_amount_per_charge
            && review.paid_this_period + review.charge_amount <= review.max_amount_per_period
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
