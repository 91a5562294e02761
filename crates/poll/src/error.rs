use cadence_store::StoreError;
use rust_decimal::Decimal;

use crate::session::SessionError;

/// Errors that can arise while running a cycle.
///
/// A store error at load time aborts the whole cycle; everything else
/// is contract-scoped and reported through the observer without
/// aborting sibling work. Policy rejection is not an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CycleError {
    #[error("subscription store error: {0}")]
    Store(#[from] StoreError),

    #[error("payment session error: {0}")]
    Session(#[from] SessionError),

    /// The quoted charge amount disagrees with the sum of the payment
    /// request's outputs. The ledger records output sums, so paying
    /// such a quote would desynchronize recorded spend from what the
    /// policy authorized.
    #[error(
        "quoted amount {quoted} does not match payment request total {request_total} for {endpoint}"
    )]
    AmountMismatch {
        endpoint: String,
        quoted: Decimal,
        request_total: Decimal,
    },
}

/// Terminal state of one reconciliation cycle.
///
/// `run_cycle` never panics or errors out of a completed invocation;
/// this is its only result.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The cycle processed every subscription; `n` payments were sent.
    Completed(usize),
    /// The store could not be loaded; no contracts were processed.
    Aborted(CycleError),
}

impl CycleOutcome {
    /// Payments sent this cycle (zero for an aborted cycle).
    pub fn paid_count(&self) -> usize {
        match self {
            CycleOutcome::Completed(n) => *n,
            CycleOutcome::Aborted(_) => 0,
        }
    }
}
