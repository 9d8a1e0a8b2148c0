//! Execution context establishment for started work.

use crate::error::ContextSetupError;
use connector_core::{ContextKind, ExecutionContext, Xid};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

tokio::task_local! {
    static CURRENT: ExecutionContext;
}

/// Execution context of the work running on the current task, if any.
pub fn current_context() -> Option<ExecutionContext> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Imported transaction of the work running on the current task, if any.
pub fn current_xid() -> Option<Xid> {
    CURRENT.try_with(|ctx| ctx.xid().cloned()).ok().flatten()
}

/// Transactions that currently have work running.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveTransactions {
    inner: Arc<Mutex<HashSet<Xid>>>,
}

impl ActiveTransactions {
    fn claim(&self, xid: &Xid) -> Result<TransactionClaim, ContextSetupError> {
        let mut active = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(xid.clone()) {
            return Err(ContextSetupError::ConcurrentWorkDisallowed(xid.clone()));
        }
        Ok(TransactionClaim {
            xid: xid.clone(),
            active: self.clone(),
        })
    }

    #[cfg(test)]
    fn contains(&self, xid: &Xid) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(xid)
    }
}

/// Released on drop.
#[derive(Debug)]
struct TransactionClaim {
    xid: Xid,
    active: ActiveTransactions,
}

impl Drop for TransactionClaim {
    fn drop(&mut self) {
        self.active
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.xid);
    }
}

/// Established context for one started item.
///
/// Holds the transaction claim for as long as the scope lives; the ambient
/// context is visible only inside [`ExecutionScope::run`].
#[derive(Debug)]
pub(crate) struct ExecutionScope {
    context: ExecutionContext,
    _claim: Option<TransactionClaim>,
}

impl ExecutionScope {
    pub(crate) fn establish(
        context: Option<ExecutionContext>,
        supported: &HashSet<ContextKind>,
        active: &ActiveTransactions,
    ) -> Result<Self, ContextSetupError> {
        let context = context.unwrap_or_default();

        if let Some(kind) = context
            .required_kinds()
            .into_iter()
            .find(|kind| !supported.contains(kind))
        {
            return Err(ContextSetupError::UnsupportedContext(kind));
        }

        let claim = context.xid().map(|xid| active.claim(xid)).transpose()?;

        Ok(Self {
            context,
            _claim: claim,
        })
    }

    pub(crate) fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Run `fut` with this context ambient, then release the scope.
    pub(crate) async fn run<F: Future>(self, fut: F) -> F::Output {
        let context = self.context.clone();
        let output = CURRENT.scope(context, fut).await;
        drop(self);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn all_kinds() -> HashSet<ContextKind> {
        [ContextKind::Transaction, ContextKind::Hint].into_iter().collect()
    }

    fn xid(n: u8) -> Xid {
        Xid::new(9, vec![n], Vec::new()).unwrap()
    }

    #[tokio::test]
    async fn test_context_is_ambient_only_inside_scope() {
        let active = ActiveTransactions::default();
        let ctx = ExecutionContext::new().with_xid(xid(1));
        let scope = ExecutionScope::establish(Some(ctx.clone()), &all_kinds(), &active).unwrap();

        assert!(current_context().is_none());
        let seen = scope.run(async { (current_context(), current_xid()) }).await;
        assert_eq!(seen.0, Some(ctx));
        assert_eq!(seen.1, Some(xid(1)));
        assert!(current_context().is_none());
    }

    #[test]
    fn test_concurrent_work_on_same_xid_is_refused() {
        let active = ActiveTransactions::default();
        let ctx = ExecutionContext::new().with_xid(xid(2));

        let first = ExecutionScope::establish(Some(ctx.clone()), &all_kinds(), &active).unwrap();
        let second = ExecutionScope::establish(Some(ctx.clone()), &all_kinds(), &active);
        assert_eq!(
            second.unwrap_err(),
            ContextSetupError::ConcurrentWorkDisallowed(xid(2))
        );

        drop(first);
        assert!(!active.contains(&xid(2)));
        assert!(ExecutionScope::establish(Some(ctx), &all_kinds(), &active).is_ok());
    }

    #[tokio::test]
    async fn test_claim_released_after_run() {
        let active = ActiveTransactions::default();
        let ctx = ExecutionContext::new().with_xid(xid(3));
        let scope = ExecutionScope::establish(Some(ctx), &all_kinds(), &active).unwrap();

        assert!(active.contains(&xid(3)));
        scope.run(async {}).await;
        assert!(!active.contains(&xid(3)));
    }

    #[test]
    fn test_unsupported_kind_fails_setup() {
        let active = ActiveTransactions::default();
        let hints_only: HashSet<ContextKind> = [ContextKind::Hint].into_iter().collect();
        let ctx = ExecutionContext::new().with_transaction_timeout(Duration::from_secs(1));

        let err = ExecutionScope::establish(Some(ctx), &hints_only, &active).unwrap_err();
        assert_eq!(err, ContextSetupError::UnsupportedContext(ContextKind::Transaction));
    }

    #[test]
    fn test_empty_context_needs_nothing() {
        let active = ActiveTransactions::default();
        let scope = ExecutionScope::establish(None, &HashSet::new(), &active).unwrap();
        assert_eq!(scope.context(), &ExecutionContext::default());
    }
}
