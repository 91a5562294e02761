//! The per-cycle decision procedure.
//!
//! One [`Reconciler::run_cycle`] invocation: load the store, walk every
//! subscription's currently-active contracts in stored order, and for
//! each one fetch a fresh charge, consult the policy, submit the
//! payment, and durably record the spend. Each contract is processed at
//! most once per cycle and failures are isolated at the contract
//! boundary; only a store load failure aborts the cycle.
//!
//! The reconciler holds a read-derived, cycle-scoped view of the store;
//! all mutation flows back through the store's merge/append operations.

use std::sync::Arc;

use cadence_store::{unix_now, Contract, ContractStore, PaymentRecord, Subscription};
use rust_decimal::Decimal;

use crate::callback::{ChargePolicy, ChargeReview, CycleEvent, CycleObserver};
use crate::error::{CycleError, CycleOutcome};
use crate::session::PaymentSession;

/// Runs one reconciliation cycle over a subscription store.
///
/// The host's outer timer decides when a cycle runs; the reconciler
/// only executes one cycle to completion when invoked, and expects at
/// most one cycle in flight per store path.
pub struct Reconciler {
    store: ContractStore,
    session: Arc<dyn PaymentSession>,
    policy: Arc<dyn ChargePolicy>,
    observer: Arc<dyn CycleObserver>,
    verify_identity: bool,
}

impl Reconciler {
    /// Collaborators are shared handles so the host can keep hold of
    /// its session and observer across cycles.
    pub fn new(
        store: ContractStore,
        session: Arc<dyn PaymentSession>,
        policy: Arc<dyn ChargePolicy>,
        observer: Arc<dyn CycleObserver>,
    ) -> Self {
        Reconciler {
            store,
            session,
            policy,
            observer,
            verify_identity: true,
        }
    }

    /// Whether charge fetches ask the session to verify counterparty
    /// identity. On by default.
    pub fn verify_identity(mut self, verify: bool) -> Self {
        self.verify_identity = verify;
        self
    }

    /// Execute one cycle to completion.
    ///
    /// Never panics or errors out of a completed invocation; the
    /// observer always receives exactly one `CycleComplete` event, and
    /// the outcome mirrors it.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let snapshot = match self.store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Nothing is known to be safe to process.
                let error = CycleError::Store(e);
                self.observer
                    .on_event(CycleEvent::ContractFailed {
                        error: error.clone(),
                        merchant_id: None,
                        subscription_id: None,
                        contract_id: None,
                    })
                    .await;
                self.observer
                    .on_event(CycleEvent::CycleComplete { paid_count: 0 })
                    .await;
                return CycleOutcome::Aborted(error);
            }
        };

        let now = unix_now();
        let mut paid_count = 0usize;

        for subscription in snapshot.subscriptions() {
            for contract in subscription.active_contracts(now) {
                match self.charge_contract(subscription, contract, now).await {
                    Ok(true) => paid_count += 1,
                    Ok(false) => {}
                    Err(error) => {
                        self.observer
                            .on_event(CycleEvent::ContractFailed {
                                error,
                                merchant_id: Some(subscription.merchant_id.clone()),
                                subscription_id: Some(subscription.subscription_id.clone()),
                                contract_id: Some(contract.contract_id.clone()),
                            })
                            .await;
                    }
                }
            }
        }

        self.observer
            .on_event(CycleEvent::CycleComplete { paid_count })
            .await;
        CycleOutcome::Completed(paid_count)
    }

    /// Attempt one charge cycle for a single active contract.
    ///
    /// Returns whether a payment was sent. `Ok(false)` covers the
    /// silent skips: nothing to pay, nested recurring terms in the
    /// refresh, or a policy decline.
    async fn charge_contract(
        &self,
        subscription: &Subscription,
        contract: &Contract,
        now: i64,
    ) -> Result<bool, CycleError> {
        let quote = self
            .session
            .fetch_current_charge(&contract.polling_endpoint, self.verify_identity)
            .await?;

        // Nothing to pay this cycle.
        if quote.amount <= Decimal::ZERO {
            return Ok(false);
        }
        // Recurring terms must only appear in the initial contract,
        // never in a polled refresh.
        if quote.recurring_terms_present {
            return Ok(false);
        }
        // The ledger records output sums; a quote whose outputs do not
        // add up to the quoted amount would be authorized at one figure
        // and recorded at another.
        let request_total = quote.request.total_amount();
        if request_total != quote.amount {
            return Err(CycleError::AmountMismatch {
                endpoint: contract.polling_endpoint.clone(),
                quoted: quote.amount,
                request_total,
            });
        }

        let paid_this_period =
            subscription.amount_paid_in_period(&contract.contract_id, None, None);

        let review = ChargeReview {
            merchant_id: subscription.merchant_id.clone(),
            subscription_id: subscription.subscription_id.clone(),
            contract_id: contract.contract_id.clone(),
            request: quote.request.clone(),
            max_amount_per_charge: contract.max_amount_per_charge,
            period_type: contract.period_type,
            max_amount_per_period: contract.max_amount_per_period,
            charge_amount: quote.amount,
            paid_this_period,
        };
        if !self.policy.authorize(&review).await {
            return Ok(false);
        }

        let ack = self
            .session
            .send_payment(&quote.request, &quote.prepared_transaction)
            .await?;
        self.observer
            .on_event(CycleEvent::Acknowledged {
                merchant_id: subscription.merchant_id.clone(),
                subscription_id: subscription.subscription_id.clone(),
                contract_id: contract.contract_id.clone(),
                request: quote.request.clone(),
                ack,
            })
            .await;

        let record = PaymentRecord {
            contract_id: contract.contract_id.clone(),
            timestamp: now,
            outputs: quote.request.outputs.clone(),
        };
        if let Err(e) = self.store.append_payment_record(
            &subscription.merchant_id,
            &subscription.subscription_id,
            record,
        ) {
            // The payment already went out; surface the bookkeeping
            // failure without dropping it from the paid count.
            self.observer
                .on_event(CycleEvent::ContractFailed {
                    error: CycleError::Store(e),
                    merchant_id: Some(subscription.merchant_id.clone()),
                    subscription_id: Some(subscription.subscription_id.clone()),
                    contract_id: Some(contract.contract_id.clone()),
                })
                .await;
        }

        Ok(true)
    }
}
