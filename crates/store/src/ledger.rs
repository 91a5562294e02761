//! Period ledger: how much a contract has already consumed.
//!
//! The sole authority for "amount already paid toward a contract within
//! a time window", computed from persisted [`PaymentRecord`]s. Both
//! window bounds are optional and inclusive; with both absent the whole
//! history is summed. Deterministic for identical inputs.

use rust_decimal::Decimal;

use crate::model::{ContractId, PaymentRecord, Subscription};

impl Subscription {
    /// Payment records for `contract_id` whose timestamp falls inside
    /// the (inclusive, optionally open) window.
    ///
    /// History is matched by contract ID alone, so records survive the
    /// contract's removal from the current set.
    pub fn payments_for_contract<'a>(
        &'a self,
        contract_id: &'a ContractId,
        period_start: Option<i64>,
        period_end: Option<i64>,
    ) -> impl Iterator<Item = &'a PaymentRecord> {
        self.payments.iter().filter(move |record| {
            record.contract_id == *contract_id
                && in_window(record.timestamp, period_start, period_end)
        })
    }

    /// Sum of all payment amounts for `contract_id` within the window.
    ///
    /// Returns zero for a contract with no matching history.
    pub fn amount_paid_in_period(
        &self,
        contract_id: &ContractId,
        period_start: Option<i64>,
        period_end: Option<i64>,
    ) -> Decimal {
        self.payments_for_contract(contract_id, period_start, period_end)
            .map(PaymentRecord::amount)
            .sum()
    }
}

fn in_window(timestamp: i64, start: Option<i64>, end: Option<i64>) -> bool {
    start.map_or(true, |s| timestamp >= s) && end.map_or(true, |e| timestamp <= e)
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
