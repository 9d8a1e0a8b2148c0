//! Transaction synchronization registry.

use connector_core::Xid;
use connector_work::current_xid;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Resource value bound to a transaction.
pub type Resource = Arc<dyn Any + Send + Sync>;

/// Status of the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Active
    Active,
    /// Active, but can only roll back
    MarkedRollback,
    /// Prepared
    Prepared,
    /// Committed
    Committed,
    /// Rolled back
    RolledBack,
    /// Status cannot be determined
    Unknown,
    /// No transaction is associated
    NoTransaction,
    /// Preparing
    Preparing,
    /// Committing
    Committing,
    /// Rolling back
    RollingBack,
}

impl TransactionStatus {
    /// Numeric status code.
    pub fn code(self) -> i32 {
        match self {
            TransactionStatus::Active => 0,
            TransactionStatus::MarkedRollback => 1,
            TransactionStatus::Prepared => 2,
            TransactionStatus::Committed => 3,
            TransactionStatus::RolledBack => 4,
            TransactionStatus::Unknown => 5,
            TransactionStatus::NoTransaction => 6,
            TransactionStatus::Preparing => 7,
            TransactionStatus::Committing => 8,
            TransactionStatus::RollingBack => 9,
        }
    }
}

/// Callbacks around transaction completion.
pub trait Synchronization: Send + Sync {
    /// Before the two-phase commit starts.
    fn before_completion(&self) {}

    /// After the transaction committed or rolled back.
    fn after_completion(&self, _status: TransactionStatus) {}
}

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncRegistryError {
    /// The calling work runs outside a transaction
    #[error("no transaction is associated with the current work")]
    NoTransaction,

    /// The transaction is completing
    #[error("transaction {0} is completing")]
    Completing(Xid),
}

/// Per-transaction resources and synchronizations for the calling work.
///
/// Every operation acts on the transaction imported by the work running on
/// the current task.
pub trait TransactionSynchronizationRegistry: Send + Sync {
    /// Key of the current transaction.
    fn transaction_key(&self) -> Option<Xid>;

    /// Bind a resource to the current transaction.
    fn put_resource(&self, key: &str, value: Resource) -> Result<(), SyncRegistryError>;

    /// Resource bound to the current transaction.
    fn get_resource(&self, key: &str) -> Result<Option<Resource>, SyncRegistryError>;

    /// Register a synchronization that runs after application ones.
    fn register_interposed_synchronization(
        &self,
        sync: Arc<dyn Synchronization>,
    ) -> Result<(), SyncRegistryError>;

    /// Status of the current transaction.
    fn transaction_status(&self) -> TransactionStatus;

    /// Make rollback the only outcome of the current transaction.
    fn set_rollback_only(&self) -> Result<(), SyncRegistryError>;

    /// Whether the current transaction is marked for rollback.
    fn rollback_only(&self) -> Result<bool, SyncRegistryError>;
}

#[derive(Default)]
struct Entry {
    status: Option<TransactionStatus>,
    resources: HashMap<String, Resource>,
    synchronizations: Vec<Arc<dyn Synchronization>>,
}

impl Entry {
    fn status(&self) -> TransactionStatus {
        self.status.unwrap_or(TransactionStatus::Active)
    }

    fn completing(&self) -> bool {
        !matches!(
            self.status(),
            TransactionStatus::Active | TransactionStatus::MarkedRollback
        )
    }
}

/// Registry kept in process memory, keyed by imported Xid.
#[derive(Default)]
pub struct InMemorySynchronizationRegistry {
    transactions: Mutex<HashMap<Xid, Entry>>,
}

impl InMemorySynchronizationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn current() -> Result<Xid, SyncRegistryError> {
        current_xid().ok_or(SyncRegistryError::NoTransaction)
    }

    /// Read the transaction's state without creating any.
    fn read_entry<T>(&self, xid: &Xid, f: impl FnOnce(&Entry) -> T, missing: T) -> T {
        let transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        transactions.get(xid).map(f).unwrap_or(missing)
    }

    fn with_entry<T>(&self, xid: Xid, f: impl FnOnce(&mut Entry) -> T) -> T {
        let mut transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(transactions.entry(xid).or_default())
    }

    /// Complete a transaction: run synchronizations and drop its state.
    ///
    /// A transaction marked rollback-only rolls back even when `commit` is
    /// requested. Returns the final status.
    pub fn complete(&self, xid: &Xid, commit: bool) -> TransactionStatus {
        let (rollback_only, syncs) = {
            let mut transactions = self
                .transactions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let entry = transactions.entry(xid.clone()).or_default();
            let rollback_only = entry.status() == TransactionStatus::MarkedRollback;
            entry.status = Some(if commit && !rollback_only {
                TransactionStatus::Committing
            } else {
                TransactionStatus::RollingBack
            });
            (rollback_only, entry.synchronizations.clone())
        };

        let status = if commit && !rollback_only {
            for sync in &syncs {
                sync.before_completion();
            }
            TransactionStatus::Committed
        } else {
            if commit {
                warn!("Transaction {} is rollback-only, rolling back", xid);
            }
            TransactionStatus::RolledBack
        };

        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(xid);

        for sync in &syncs {
            sync.after_completion(status);
        }
        debug!("Transaction {} completed as {:?}", xid, status);
        status
    }

    /// Transactions with registered state.
    pub fn len(&self) -> usize {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no transaction has registered state.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InMemorySynchronizationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySynchronizationRegistry")
            .field("transactions", &self.len())
            .finish()
    }
}

impl TransactionSynchronizationRegistry for InMemorySynchronizationRegistry {
    fn transaction_key(&self) -> Option<Xid> {
        current_xid()
    }

    fn put_resource(&self, key: &str, value: Resource) -> Result<(), SyncRegistryError> {
        let xid = Self::current()?;
        self.with_entry(xid.clone(), |entry| {
            if entry.completing() {
                return Err(SyncRegistryError::Completing(xid));
            }
            entry.resources.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn get_resource(&self, key: &str) -> Result<Option<Resource>, SyncRegistryError> {
        let xid = Self::current()?;
        Ok(self.read_entry(&xid, |entry| entry.resources.get(key).cloned(), None))
    }

    fn register_interposed_synchronization(
        &self,
        sync: Arc<dyn Synchronization>,
    ) -> Result<(), SyncRegistryError> {
        let xid = Self::current()?;
        self.with_entry(xid.clone(), |entry| {
            if entry.completing() {
                return Err(SyncRegistryError::Completing(xid));
            }
            entry.synchronizations.push(sync);
            Ok(())
        })
    }

    fn transaction_status(&self) -> TransactionStatus {
        match current_xid() {
            Some(xid) => self.read_entry(&xid, Entry::status, TransactionStatus::Active),
            None => TransactionStatus::NoTransaction,
        }
    }

    fn set_rollback_only(&self) -> Result<(), SyncRegistryError> {
        let xid = Self::current()?;
        self.with_entry(xid.clone(), |entry| {
            if entry.completing() {
                return Err(SyncRegistryError::Completing(xid));
            }
            entry.status = Some(TransactionStatus::MarkedRollback);
            Ok(())
        })
    }

    fn rollback_only(&self) -> Result<bool, SyncRegistryError> {
        let xid = Self::current()?;
        Ok(self.read_entry(
            &xid,
            |entry| entry.status() == TransactionStatus::MarkedRollback,
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector_core::ExecutionContext;
    use connector_work::{work_fn, PooledWorkManager, SubmitOptions, WorkManager, WorkManagerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        before: AtomicUsize,
        after: Mutex<Vec<TransactionStatus>>,
    }

    impl Synchronization for Counting {
        fn before_completion(&self) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_completion(&self, status: TransactionStatus) {
            self.after.lock().unwrap().push(status);
        }
    }

    fn xid() -> Xid {
        Xid::new(7, b"tsr".to_vec(), Vec::new()).unwrap()
    }

    fn options() -> SubmitOptions {
        SubmitOptions::new().with_context(ExecutionContext::new().with_xid(xid()))
    }

    #[test]
    fn test_outside_work_has_no_transaction() {
        let tsr = InMemorySynchronizationRegistry::new();
        assert_eq!(tsr.transaction_key(), None);
        assert_eq!(tsr.transaction_status(), TransactionStatus::NoTransaction);
        assert_eq!(
            tsr.get_resource("k").unwrap_err(),
            SyncRegistryError::NoTransaction
        );
        assert_eq!(tsr.set_rollback_only(), Err(SyncRegistryError::NoTransaction));
    }

    #[tokio::test]
    async fn test_resources_follow_the_transaction() {
        let tsr = Arc::new(InMemorySynchronizationRegistry::new());
        let wm = PooledWorkManager::new(WorkManagerConfig::default());

        let writer = Arc::clone(&tsr);
        wm.do_work(
            work_fn("writer", move |_| {
                let tsr = Arc::clone(&writer);
                async move {
                    assert_eq!(tsr.transaction_key(), Some(xid()));
                    tsr.put_resource("conn", Arc::new(42u32))?;
                    Ok(())
                }
            }),
            options(),
        )
        .await
        .unwrap();

        let reader = Arc::clone(&tsr);
        wm.do_work(
            work_fn("reader", move |_| {
                let tsr = Arc::clone(&reader);
                async move {
                    let value = tsr.get_resource("conn")?.expect("resource bound");
                    assert_eq!(value.downcast_ref::<u32>(), Some(&42));
                    assert_eq!(tsr.transaction_status(), TransactionStatus::Active);
                    Ok(())
                }
            }),
            options(),
        )
        .await
        .unwrap();

        assert_eq!(tsr.complete(&xid(), true), TransactionStatus::Committed);
        assert!(tsr.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_only_wins_over_commit() {
        let tsr = Arc::new(InMemorySynchronizationRegistry::new());
        let wm = PooledWorkManager::new(WorkManagerConfig::default());
        let sync = Arc::new(Counting::default());

        let inner = Arc::clone(&tsr);
        let registered: Arc<dyn Synchronization> = sync.clone();
        wm.do_work(
            work_fn("doomed", move |_| {
                let tsr = Arc::clone(&inner);
                let sync = Arc::clone(&registered);
                async move {
                    tsr.register_interposed_synchronization(sync)?;
                    tsr.set_rollback_only()?;
                    assert!(tsr.rollback_only()?);
                    Ok(())
                }
            }),
            options(),
        )
        .await
        .unwrap();

        assert_eq!(tsr.complete(&xid(), true), TransactionStatus::RolledBack);
        assert_eq!(sync.before.load(Ordering::SeqCst), 0);
        assert_eq!(*sync.after.lock().unwrap(), vec![TransactionStatus::RolledBack]);
    }

    #[tokio::test]
    async fn test_commit_runs_both_callbacks() {
        let tsr = Arc::new(InMemorySynchronizationRegistry::new());
        let wm = PooledWorkManager::new(WorkManagerConfig::default());
        let sync = Arc::new(Counting::default());

        let inner = Arc::clone(&tsr);
        let registered: Arc<dyn Synchronization> = sync.clone();
        wm.do_work(
            work_fn("sync", move |_| {
                let tsr = Arc::clone(&inner);
                let sync = Arc::clone(&registered);
                async move {
                    tsr.register_interposed_synchronization(sync)?;
                    Ok(())
                }
            }),
            options(),
        )
        .await
        .unwrap();

        assert_eq!(tsr.complete(&xid(), true), TransactionStatus::Committed);
        assert_eq!(sync.before.load(Ordering::SeqCst), 1);
        assert_eq!(*sync.after.lock().unwrap(), vec![TransactionStatus::Committed]);
    }

    #[tokio::test]
    async fn test_queries_leave_no_state_behind() {
        let tsr = Arc::new(InMemorySynchronizationRegistry::new());
        let wm = PooledWorkManager::new(WorkManagerConfig::default());

        for n in 0..20u8 {
            let xid = Xid::new(7, vec![b'q', n], Vec::new()).unwrap();
            let reader = Arc::clone(&tsr);
            wm.do_work(
                work_fn("reader", move |_| {
                    let tsr = Arc::clone(&reader);
                    async move {
                        assert_eq!(tsr.transaction_status(), TransactionStatus::Active);
                        assert!(tsr.get_resource("conn")?.is_none());
                        assert!(!tsr.rollback_only()?);
                        Ok(())
                    }
                }),
                SubmitOptions::new().with_context(ExecutionContext::new().with_xid(xid)),
            )
            .await
            .unwrap();
        }

        assert!(tsr.is_empty());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TransactionStatus::Active.code(), 0);
        assert_eq!(TransactionStatus::NoTransaction.code(), 6);
        assert_eq!(TransactionStatus::RollingBack.code(), 9);
    }
}
