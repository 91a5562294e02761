//! Payment-session collaborator abstraction.
//!
//! The reconciler treats session establishment, identity verification,
//! transaction construction and broadcast as black boxes behind
//! [`PaymentSession`]: one call to refresh the current charge for a
//! polling endpoint, one call to submit a payment. Any error from
//! either call is a per-contract failure; it never aborts the cycle.

pub mod static_session;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use cadence_store::PaymentRequest;

/// Acknowledgement from the merchant after a payment submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAck {
    pub memo: Option<String>,
}

/// A promise-like handle to a merchant acknowledgement.
///
/// `send_payment` is not required to resolve the acknowledgement
/// synchronously; the reconciler forwards this handle to the observer
/// without awaiting it.
pub type AckHandle = oneshot::Receiver<PaymentAck>;

/// A fresh charge fetched from a contract's polling endpoint.
#[derive(Debug, Clone)]
pub struct ChargeQuote {
    /// Amount the merchant is requesting now.
    pub amount: Decimal,
    /// Prepared payment metadata for this charge.
    pub request: PaymentRequest,
    /// Opaque transaction bytes prepared by the session, ready to submit.
    pub prepared_transaction: Vec<u8>,
    /// Whether the refreshed metadata carries nested recurring terms.
    /// Recurring terms belong only in the initial contract; their
    /// presence here is a protocol violation and the contract is
    /// skipped for this cycle.
    pub recurring_terms_present: bool,
}

/// Errors raised by a payment-session collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("charge fetch failed for {endpoint}: {message}")]
    ChargeFetch { endpoint: String, message: String },

    #[error("payment send failed via {endpoint}: {message}")]
    PaymentSend { endpoint: String, message: String },
}

/// External payment-protocol collaborator.
#[async_trait]
pub trait PaymentSession: Send + Sync {
    /// Fetch the current charge amount and fresh protocol metadata for
    /// a contract's polling endpoint.
    async fn fetch_current_charge(
        &self,
        endpoint: &str,
        verify_identity: bool,
    ) -> Result<ChargeQuote, SessionError>;

    /// Submit a prepared payment and return an acknowledgement handle.
    async fn send_payment(
        &self,
        request: &PaymentRequest,
        signed_transaction: &[u8],
    ) -> Result<AckHandle, SessionError>;
}
