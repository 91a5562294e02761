//! Polling reconciler for recurring-payment contracts.
//!
//! One cycle: load the subscription store, select currently-active
//! contracts, ask the payment-session collaborator for each contract's
//! fresh charge, consult the injected [`ChargePolicy`], and, if
//! approved, submit the payment and durably record the period's spend.
//!
//! The reconciler is deliberately thin on policy: contractual caps are
//! carried to the authorization hook but never compared here, and all
//! user-visible behavior flows through [`CycleObserver`] events plus
//! the returned [`CycleOutcome`].

pub mod callback;
mod error;
pub mod policy;
mod reconciler;
pub mod session;

pub use callback::{ChargePolicy, ChargeReview, CycleEvent, CycleObserver, NullObserver, RecordingObserver};
pub use error::{CycleError, CycleOutcome};
pub use policy::{ApproveAll, CapPolicy, DenyAll};
pub use reconciler::Reconciler;
pub use session::static_session::StaticSession;
pub use session::{AckHandle, ChargeQuote, PaymentAck, PaymentSession, SessionError};
