//! The injected callback surface: authorization and notification.
//!
//! Authorization ([`ChargePolicy`]) is the single point where business
//! policy lives: the reconciler supplies everything needed to enforce
//! the contract's caps but never compares them itself, so a host may
//! legitimately allow controlled overage or partial payment.
//!
//! Notification ([`CycleObserver`]) receives explicit [`CycleEvent`]
//! values: acknowledgements, per-contract failures with their context,
//! and exactly one completion event per cycle.

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use cadence_store::{ContractId, PaymentRequest, PeriodType, SubscriptionId};

use crate::error::CycleError;
use crate::session::AckHandle;

/// Everything the policy hook needs to decide one charge.
#[derive(Debug, Clone)]
pub struct ChargeReview {
    pub merchant_id: String,
    pub subscription_id: SubscriptionId,
    pub contract_id: ContractId,
    /// Prepared payment request for this charge.
    pub request: PaymentRequest,
    /// Contractual cap on a single charge. Advisory: enforcement is the
    /// policy's responsibility.
    pub max_amount_per_charge: Decimal,
    pub period_type: PeriodType,
    /// Contractual cap on total spend per period. Advisory, as above.
    pub max_amount_per_period: Decimal,
    /// Amount the merchant is requesting now.
    pub charge_amount: Decimal,
    /// Amount already sent toward this contract, per the period ledger.
    pub paid_this_period: Decimal,
}

/// Authorization hook: approve or decline one charge.
#[async_trait]
pub trait ChargePolicy: Send + Sync {
    /// Returns true if the payment should go through.
    async fn authorize(&self, review: &ChargeReview) -> bool;
}

/// One event in the life of a cycle, delivered to the observer.
#[derive(Debug)]
pub enum CycleEvent {
    /// A payment was submitted; `ack` resolves when the merchant
    /// acknowledges it.
    Acknowledged {
        merchant_id: String,
        subscription_id: SubscriptionId,
        contract_id: ContractId,
        request: PaymentRequest,
        ack: AckHandle,
    },
    /// Processing one contract failed. Context fields are absent when
    /// the failure happened before any contract was in scope (store
    /// load failure).
    ContractFailed {
        error: CycleError,
        merchant_id: Option<String>,
        subscription_id: Option<SubscriptionId>,
        contract_id: Option<ContractId>,
    },
    /// The cycle finished; fires exactly once per invocation.
    CycleComplete { paid_count: usize },
}

/// Notification hook for cycle events.
#[async_trait]
pub trait CycleObserver: Send + Sync {
    async fn on_event(&self, event: CycleEvent);
}

/// Observer that discards every event.
pub struct NullObserver;

#[async_trait]
impl CycleObserver for NullObserver {
    async fn on_event(&self, _event: CycleEvent) {}
}

/// Observer that records every event, for tests and audits.
pub struct RecordingObserver {
    events: Mutex<Vec<CycleEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        RecordingObserver {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Drain all recorded events in arrival order.
    pub fn take_events(&self) -> Vec<CycleEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Paid count from the completion event, if one arrived.
    pub fn completed_count(&self) -> Option<usize> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find_map(|event| match event {
                CycleEvent::CycleComplete { paid_count } => Some(*paid_count),
                _ => None,
            })
    }
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CycleObserver for RecordingObserver {
    async fn on_event(&self, event: CycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_observer_keeps_arrival_order() {
        let observer = RecordingObserver::new();
        observer
            .on_event(CycleEvent::CycleComplete { paid_count: 2 })
            .await;

        assert_eq!(observer.completed_count(), Some(2));
        let events = observer.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CycleEvent::CycleComplete { paid_count: 2 }));
        // Drained: a second take is empty.
        assert!(observer.take_events().is_empty());
    }

    #[tokio::test]
    async fn observers_are_object_safe() {
        let observers: Vec<Box<dyn CycleObserver>> =
            vec![Box::new(NullObserver), Box::new(RecordingObserver::new())];
        for observer in &observers {
            observer
                .on_event(CycleEvent::CycleComplete { paid_count: 0 })
                .await;
        }
    }
}
