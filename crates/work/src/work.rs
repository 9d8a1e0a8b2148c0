//! Units of work.

use async_trait::async_trait;
use connector_core::{ExecutionContext, WorkId};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A unit of executable logic submitted to a work manager.
#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Perform the work. Long-running work should watch
    /// [`RunContext::is_released`] and return early once released.
    async fn run(&self, ctx: RunContext) -> anyhow::Result<()>;

    /// Hook invoked when the runtime asks the work to stop early.
    ///
    /// Called from a thread other than the one running the work. The
    /// release token in [`RunContext`] is already cancelled when this runs.
    fn release(&self) {}

    /// Short label for logs.
    fn name(&self) -> &str {
        "work"
    }
}

/// Handle given to a running item.
#[derive(Debug, Clone)]
pub struct RunContext {
    work_id: WorkId,
    release: CancellationToken,
    context: ExecutionContext,
}

impl RunContext {
    pub(crate) fn new(work_id: WorkId, release: CancellationToken, context: ExecutionContext) -> Self {
        Self {
            work_id,
            release,
            context,
        }
    }

    /// Identifier assigned at submission.
    pub fn work_id(&self) -> WorkId {
        self.work_id
    }

    /// Whether the runtime has asked this item to stop.
    pub fn is_released(&self) -> bool {
        self.release.is_cancelled()
    }

    /// Resolves once the runtime asks this item to stop.
    pub async fn released(&self) {
        self.release.cancelled().await
    }

    /// Context this item runs under.
    pub fn execution_context(&self) -> &ExecutionContext {
        &self.context
    }
}

/// Work built from an async closure.
pub struct FnWork<F> {
    name: String,
    f: F,
}

impl<F> std::fmt::Debug for FnWork<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnWork").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Work for FnWork<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: RunContext) -> anyhow::Result<()> {
        (self.f)(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap an async closure as shareable work.
pub fn work_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Work>
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnWork {
        name: name.into(),
        f,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_work_runs_closure() {
        let work = work_fn("echo", |ctx: RunContext| async move {
            anyhow::ensure!(!ctx.is_released(), "released too early");
            Ok(())
        });
        let ctx = RunContext::new(WorkId::new(), CancellationToken::new(), ExecutionContext::new());

        assert_eq!(work.name(), "echo");
        work.run(ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_token_is_observed() {
        let token = CancellationToken::new();
        let ctx = RunContext::new(WorkId::new(), token.clone(), ExecutionContext::new());
        let work = work_fn("waiter", |ctx: RunContext| async move {
            ctx.released().await;
            anyhow::bail!("released")
        });

        token.cancel();
        let err = work.run(ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "released");
    }
}
