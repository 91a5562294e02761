//! Static payment session serving canned per-endpoint quotes.
//!
//! Useful for tests and batch dry-runs: quotes are pre-populated per
//! polling endpoint, submissions are recorded, and every send resolves
//! its acknowledgement immediately.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use cadence_store::PaymentRequest;

use super::{AckHandle, ChargeQuote, PaymentAck, PaymentSession, SessionError};

/// Session that serves pre-populated quotes keyed by polling endpoint.
///
/// Endpoints without a canned quote fail the fetch, which the
/// reconciler treats as a per-contract error.
pub struct StaticSession {
    quotes: HashMap<String, ChargeQuote>,
    sent: Mutex<Vec<PaymentRequest>>,
    send_failure: Option<String>,
}

impl StaticSession {
    /// Create a session with no canned quotes; every fetch fails.
    pub fn new() -> Self {
        StaticSession {
            quotes: HashMap::new(),
            sent: Mutex::new(Vec::new()),
            send_failure: None,
        }
    }

    /// Create a session with pre-populated quotes keyed by endpoint.
    pub fn with_quotes(quotes: HashMap<String, ChargeQuote>) -> Self {
        StaticSession {
            quotes,
            sent: Mutex::new(Vec::new()),
            send_failure: None,
        }
    }

    /// Make every subsequent submission fail with the given message.
    /// Failed submissions are not recorded in [`StaticSession::sent`].
    pub fn fail_sends(&mut self, message: impl Into<String>) {
        self.send_failure = Some(message.into());
    }

    /// Add or replace the canned quote for an endpoint.
    pub fn insert_quote(&mut self, endpoint: impl Into<String>, quote: ChargeQuote) {
        self.quotes.insert(endpoint.into(), quote);
    }

    /// Payment requests submitted so far, in submission order.
    pub fn sent(&self) -> Vec<PaymentRequest> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for StaticSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentSession for StaticSession {
    async fn fetch_current_charge(
        &self,
        endpoint: &str,
        _verify_identity: bool,
    ) -> Result<ChargeQuote, SessionError> {
        self.quotes
            .get(endpoint)
            .cloned()
            .ok_or_else(|| SessionError::ChargeFetch {
                endpoint: endpoint.to_string(),
                message: "no canned quote for endpoint".to_string(),
            })
    }

    async fn send_payment(
        &self,
        request: &PaymentRequest,
        _signed_transaction: &[u8],
    ) -> Result<AckHandle, SessionError> {
        if let Some(message) = &self.send_failure {
            return Err(SessionError::PaymentSend {
                endpoint: request.payment_endpoint.clone(),
                message: message.clone(),
            });
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let (tx, rx) = oneshot::channel();
        let _ = tx.send(PaymentAck {
            memo: Some("accepted".to_string()),
        });
        Ok(rx)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
