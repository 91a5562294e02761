//! Durable, mergeable, crash-safe store for recurring-payment
//! subscriptions.
//!
//! The backing file is a concatenation of independently-framed
//! subscription records (see [`codec`]). All mutation goes through an
//! atomic temp-file-then-rename sequence, so a crash mid-write leaves
//! the previous complete file intact. The store provides no mutual
//! exclusion between concurrent writers; hosts that overlap cycles must
//! add an external mutex keyed by the store path.

pub mod codec;
mod error;
mod ledger;
pub mod model;
mod store;

pub use error::StoreError;
pub use model::{
    unix_now, Contract, ContractBundle, ContractId, NegotiatedTerms, PaymentOutput, PaymentRecord,
    PaymentRequest, PeriodType, Subscription, SubscriptionId,
};
pub use store::{ContractStore, StoreSnapshot};
