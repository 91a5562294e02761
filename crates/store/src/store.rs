//! File-backed contract store with atomic merge/persist.
//!
//! [`ContractStore`] is a path handle; every operation takes a fresh
//! value-semantics [`StoreSnapshot`] and mutation goes through a single
//! load-modify-persist cycle. Persistence always rewrites the whole
//! store to a temporary file in the target's directory and renames it
//! over the target, so a crash mid-write leaves the previous complete
//! file intact.
//!
//! The store never retries I/O; retry policy belongs to the caller.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufReader, Write as _};
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use tempfile::NamedTempFile;

use crate::codec::{self, CodecError};
use crate::error::StoreError;
use crate::model::{
    unix_now, Contract, ContractBundle, ContractId, NegotiatedTerms, PaymentRecord, Subscription,
    SubscriptionId,
};

/// Handle to the on-disk subscription store.
///
/// Cheap to construct; holds no open file or cached state. Concurrent
/// writers are not coordinated here; "single in-flight cycle" is a
/// caller-enforced precondition (see crate docs).
#[derive(Debug, Clone)]
pub struct ContractStore {
    path: PathBuf,
}

/// An in-memory snapshot of the whole store, taken at [`ContractStore::load`]
/// time. Iteration reflects on-disk insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub(crate) subscriptions: Vec<Subscription>,
}

impl ContractStore {
    /// Open a store backed by `path`. The file need not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        ContractStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the entire backing file into a snapshot.
    ///
    /// An absent file is auto-created empty and yields a snapshot with
    /// zero subscriptions, never an error. An undecodable record fails
    /// the whole load with [`StoreError::Corrupt`].
    pub fn load(&self) -> Result<StoreSnapshot, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        let mut reader = BufReader::new(file);
        let subscriptions = codec::read_subscriptions(&mut reader).map_err(|e| match e {
            CodecError::Io(source) => StoreError::Io {
                path: self.path.clone(),
                message: source.to_string(),
            },
            other => StoreError::Corrupt {
                path: self.path.clone(),
                message: other.to_string(),
            },
        })?;

        Ok(StoreSnapshot { subscriptions })
    }

    /// Merge an incoming contract set for one subscription and persist
    /// the whole store atomically.
    ///
    /// If no subscription exists for the key, one is inserted with the
    /// incoming contracts (minus any already cancelled) and empty
    /// history. Otherwise the current set becomes: existing contracts
    /// not superseded by an incoming contract ID, plus incoming
    /// contracts that are not cancelled. Cancelled incoming contracts
    /// are dropped rather than inserted, so expired terms cannot be
    /// resurrected. Payment history is untouched.
    pub fn merge_and_persist(
        &self,
        merchant_id: &str,
        subscription_id: &SubscriptionId,
        incoming: Vec<Contract>,
    ) -> Result<(), StoreError> {
        let now = unix_now();
        let mut snapshot = self.load()?;

        match snapshot
            .subscriptions
            .iter_mut()
            .find(|s| s.merchant_id == merchant_id && &s.subscription_id == subscription_id)
        {
            Some(subscription) => {
                subscription.contracts = merge_contracts(&subscription.contracts, incoming, now);
            }
            None => snapshot.subscriptions.push(Subscription {
                merchant_id: merchant_id.to_string(),
                subscription_id: subscription_id.clone(),
                contracts: merge_contracts(&[], incoming, now),
                payments: Vec::new(),
            }),
        }

        self.persist(&snapshot)
    }

    /// Append one payment record to a subscription's history through the
    /// same atomic load-modify-persist cycle.
    ///
    /// A missing subscription is created with an empty contract set so
    /// the payment evidence is never dropped.
    pub fn append_payment_record(
        &self,
        merchant_id: &str,
        subscription_id: &SubscriptionId,
        record: PaymentRecord,
    ) -> Result<(), StoreError> {
        let mut snapshot = self.load()?;

        match snapshot
            .subscriptions
            .iter_mut()
            .find(|s| s.merchant_id == merchant_id && &s.subscription_id == subscription_id)
        {
            Some(subscription) => subscription.payments.push(record),
            None => snapshot.subscriptions.push(Subscription {
                merchant_id: merchant_id.to_string(),
                subscription_id: subscription_id.clone(),
                contracts: Vec::new(),
                payments: vec![record],
            }),
        }

        self.persist(&snapshot)
    }

    /// Initial-ingestion entry point: store a freshly-negotiated bundle,
    /// creating the subscription if new.
    pub fn ingest(&self, bundle: ContractBundle) -> Result<(), StoreError> {
        self.merge_and_persist(&bundle.merchant_id, &bundle.subscription_id, bundle.contracts)
    }

    /// Store the recurring bundle from signup-time terms, if present.
    ///
    /// Returns whether anything was stored.
    pub fn ingest_if_recurring(&self, terms: &NegotiatedTerms) -> Result<bool, StoreError> {
        match &terms.recurring {
            Some(bundle) => {
                self.ingest(bundle.clone())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Serialize the whole snapshot to a fresh temporary file in the
    /// target's directory, then atomically rename it over the target.
    ///
    /// Until the rename point only the temporary file is touched, so a
    /// failure anywhere leaves the on-disk store unchanged.
    fn persist(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| self.persistence_error(e))?;

        codec::write_subscriptions(&mut temp, &snapshot.subscriptions).map_err(|e| {
            StoreError::Persistence {
                path: self.path.clone(),
                message: e.to_string(),
            }
        })?;
        temp.flush().map_err(|e| self.persistence_error(e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| self.persistence_error(e))?;

        temp.persist(&self.path)
            .map_err(|e| self.persistence_error(e.error))?;
        Ok(())
    }

    fn persistence_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Persistence {
            path: self.path.clone(),
            message: source.to_string(),
        }
    }
}

impl StoreSnapshot {
    /// Lazy, restartable iteration over subscriptions in stored order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Look up one subscription by its (merchant, subscription) key.
    pub fn find(
        &self,
        merchant_id: &str,
        subscription_id: &SubscriptionId,
    ) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.merchant_id == merchant_id && &s.subscription_id == subscription_id)
    }

    /// Sum payments for `contract_id` across all subscriptions within
    /// the (inclusive, optionally open) window.
    ///
    /// Contract IDs are unique within a subscription; a collision across
    /// subscriptions would sum both histories, which callers avoid by
    /// querying through [`Subscription::amount_paid_in_period`] when the
    /// key is known.
    pub fn amount_paid_in_period(
        &self,
        contract_id: &ContractId,
        period_start: Option<i64>,
        period_end: Option<i64>,
    ) -> Decimal {
        self.subscriptions
            .iter()
            .map(|s| s.amount_paid_in_period(contract_id, period_start, period_end))
            .sum()
    }
}

/// Pure merge step: existing contracts not superseded by an incoming
/// contract ID, plus incoming contracts that are not cancelled at `now`.
fn merge_contracts(existing: &[Contract], incoming: Vec<Contract>, now: i64) -> Vec<Contract> {
    let superseded: HashSet<ContractId> =
        incoming.iter().map(|c| c.contract_id.clone()).collect();

    let mut updated: Vec<Contract> = existing
        .iter()
        .filter(|c| !superseded.contains(&c.contract_id))
        .cloned()
        .collect();
    updated.extend(incoming.into_iter().filter(|c| !c.is_cancelled(now)));
    updated
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PaymentOutput, PeriodType};

    fn contract(id: &str, endpoint: &str, end_time: Option<i64>) -> Contract {
        Contract {
            contract_id: ContractId::new(id.as_bytes()),
            polling_endpoint: endpoint.to_string(),
            max_amount_per_charge: Decimal::from(1000),
            max_amount_per_period: Decimal::from(4000),
            period_type: PeriodType::Monthly,
            start_time: unix_now() - 10,
            end_time,
        }
    }

    fn record(id: &str, timestamp: i64, amount: i64) -> PaymentRecord {
        PaymentRecord {
            contract_id: ContractId::new(id.as_bytes()),
            timestamp,
            outputs: vec![PaymentOutput {
                amount: Decimal::from(amount),
                script: vec![],
            }],
        }
    }

    fn sub_id(s: &str) -> SubscriptionId {
        SubscriptionId::new(s.as_bytes())
    }

    fn contract_ids(subscription: &Subscription) -> Vec<ContractId> {
        let mut ids: Vec<ContractId> = subscription
            .contracts
            .iter()
            .map(|c| c.contract_id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn absent_file_loads_empty_and_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions");
        let store = ContractStore::open(&path);

        let snapshot = store.load().unwrap();
        assert!(snapshot.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn merge_into_empty_store_creates_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        store
            .merge_and_persist("m1", &sub_id("s1"), vec![contract("c1", "https://a/", None)])
            .unwrap();

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.len(), 1);
        let subscription = snapshot.find("m1", &sub_id("s1")).unwrap();
        assert_eq!(subscription.contracts.len(), 1);
        assert!(subscription.payments.is_empty());
    }

    #[test]
    fn noop_merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        store
            .merge_and_persist(
                "m1",
                &sub_id("s1"),
                vec![contract("c1", "https://a/", None), contract("c2", "https://b/", None)],
            )
            .unwrap();
        let before = store.load().unwrap();

        store.merge_and_persist("m1", &sub_id("s1"), vec![]).unwrap();
        let after = store.load().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn merge_updates_and_adds_contracts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        store
            .merge_and_persist(
                "m1",
                &sub_id("s1"),
                vec![contract("c1", "https://old/", None), contract("c2", "https://b/", None)],
            )
            .unwrap();

        // c1 updated (new endpoint), c3 new
        store
            .merge_and_persist(
                "m1",
                &sub_id("s1"),
                vec![contract("c1", "https://new/", None), contract("c3", "https://c/", None)],
            )
            .unwrap();

        let snapshot = store.load().unwrap();
        let subscription = snapshot.find("m1", &sub_id("s1")).unwrap();
        assert_eq!(
            contract_ids(subscription),
            vec![
                ContractId::new(b"c1".to_vec()),
                ContractId::new(b"c2".to_vec()),
                ContractId::new(b"c3".to_vec()),
            ]
        );
        let c1 = subscription.contract(&ContractId::new(b"c1".to_vec())).unwrap();
        assert_eq!(c1.polling_endpoint, "https://new/");
    }

    #[test]
    fn cancelled_incoming_contract_removes_but_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        store
            .merge_and_persist(
                "m1",
                &sub_id("s1"),
                vec![
                    contract("c1", "https://a/", None),
                    contract("c2", "https://b/", None),
                    contract("c3", "https://c/", None),
                ],
            )
            .unwrap();
        store
            .append_payment_record("m1", &sub_id("s1"), record("c2", unix_now() - 5, 750))
            .unwrap();

        // c2 arrives cancelled: end time in the past
        store
            .merge_and_persist(
                "m1",
                &sub_id("s1"),
                vec![contract("c2", "https://b/", Some(unix_now() - 1))],
            )
            .unwrap();

        let snapshot = store.load().unwrap();
        let subscription = snapshot.find("m1", &sub_id("s1")).unwrap();
        assert_eq!(
            contract_ids(subscription),
            vec![ContractId::new(b"c1".to_vec()), ContractId::new(b"c3".to_vec())]
        );
        // History for the removed contract stays queryable.
        assert_eq!(
            subscription.amount_paid_in_period(&ContractId::new(b"c2".to_vec()), None, None),
            Decimal::from(750)
        );
    }

    #[test]
    fn cancelled_contract_never_enters_a_new_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        store
            .merge_and_persist(
                "m1",
                &sub_id("s1"),
                vec![
                    contract("c1", "https://a/", Some(unix_now() - 1)),
                    contract("c2", "https://b/", None),
                ],
            )
            .unwrap();

        let snapshot = store.load().unwrap();
        let subscription = snapshot.find("m1", &sub_id("s1")).unwrap();
        assert_eq!(contract_ids(subscription), vec![ContractId::new(b"c2".to_vec())]);
    }

    #[test]
    fn merge_does_not_touch_payment_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        store
            .merge_and_persist("m1", &sub_id("s1"), vec![contract("c1", "https://a/", None)])
            .unwrap();
        store
            .append_payment_record("m1", &sub_id("s1"), record("c1", 100, 500))
            .unwrap();

        store
            .merge_and_persist("m1", &sub_id("s1"), vec![contract("c1", "https://new/", None)])
            .unwrap();

        let snapshot = store.load().unwrap();
        let subscription = snapshot.find("m1", &sub_id("s1")).unwrap();
        assert_eq!(subscription.payments, vec![record("c1", 100, 500)]);
    }

    #[test]
    fn subscriptions_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        for merchant in ["m1", "m2", "m3"] {
            store
                .merge_and_persist(merchant, &sub_id(merchant), vec![contract("c1", "https://a/", None)])
                .unwrap();
        }

        let order: Vec<String> = store
            .load()
            .unwrap()
            .subscriptions()
            .map(|s| s.merchant_id.clone())
            .collect();
        assert_eq!(order, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn append_creates_missing_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        store
            .append_payment_record("m1", &sub_id("s1"), record("c1", 100, 500))
            .unwrap();

        let snapshot = store.load().unwrap();
        let subscription = snapshot.find("m1", &sub_id("s1")).unwrap();
        assert!(subscription.contracts.is_empty());
        assert_eq!(
            snapshot.amount_paid_in_period(&ContractId::new(b"c1".to_vec()), None, None),
            Decimal::from(500)
        );
    }

    #[test]
    fn corrupt_file_fails_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions");
        std::fs::write(&path, [0u8, 0, 0, 5, b'j', b'u', b'n', b'k', b'!']).unwrap();

        let err = ContractStore::open(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn stray_temp_file_leaves_store_untouched() {
        // Simulates a crash between temp-file write and rename: the
        // rename never executed, so the original must load unchanged.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions");
        let store = ContractStore::open(&path);

        store
            .merge_and_persist("m1", &sub_id("s1"), vec![contract("c1", "https://a/", None)])
            .unwrap();
        let original_bytes = std::fs::read(&path).unwrap();

        // A would-be second writer that died before its rename.
        let mut temp = NamedTempFile::new_in(dir.path()).unwrap();
        let abandoned = StoreSnapshot {
            subscriptions: vec![Subscription {
                merchant_id: "other".to_string(),
                subscription_id: sub_id("other"),
                contracts: vec![],
                payments: vec![],
            }],
        };
        codec::write_subscriptions(&mut temp, &abandoned.subscriptions).unwrap();
        temp.flush().unwrap();
        std::mem::forget(temp); // crash: never renamed, never cleaned up

        assert_eq!(std::fs::read(&path).unwrap(), original_bytes);
        let snapshot = store.load().unwrap();
        assert!(snapshot.find("m1", &sub_id("s1")).is_some());
        assert!(snapshot.find("other", &sub_id("other")).is_none());
    }

    #[test]
    fn ingest_if_recurring_stores_only_when_terms_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContractStore::open(dir.path().join("subscriptions"));

        let payment = crate::model::PaymentRequest {
            payment_endpoint: "https://merchant.example/pay".to_string(),
            outputs: vec![],
            memo: None,
            merchant_data: None,
        };

        let one_off = NegotiatedTerms {
            payment: payment.clone(),
            recurring: None,
        };
        assert!(!store.ingest_if_recurring(&one_off).unwrap());
        assert!(store.load().unwrap().is_empty());

        let recurring = NegotiatedTerms {
            payment,
            recurring: Some(ContractBundle {
                merchant_id: "m1".to_string(),
                subscription_id: sub_id("s1"),
                contracts: vec![contract("c1", "https://a/", None)],
            }),
        };
        assert!(store.ingest_if_recurring(&recurring).unwrap());
        assert!(store.load().unwrap().find("m1", &sub_id("s1")).is_some());
    }

    #[test]
    fn merge_contracts_pure_step() {
        let now = unix_now();
        let existing = vec![contract("c1", "https://a/", None), contract("c2", "https://b/", None)];
        let incoming = vec![
            contract("c1", "https://updated/", None),
            contract("c3", "https://c/", Some(now - 1)), // cancelled, dropped
        ];

        let merged = merge_contracts(&existing, incoming, now);
        let mut ids: Vec<&ContractId> = merged.iter().map(|c| &c.contract_id).collect();
        ids.sort();
        assert_eq!(
            ids,
            vec![&ContractId::new(b"c1".to_vec()), &ContractId::new(b"c2".to_vec())]
        );
        assert!(merged.iter().any(|c| c.polling_endpoint == "https://updated/"));
    }
}
