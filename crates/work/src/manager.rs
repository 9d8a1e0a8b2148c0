//! Work manager service.
//!
//! [`PooledWorkManager`] runs submitted work on the tokio runtime with a
//! bounded number of concurrently running items and a bounded queue of items
//! waiting for a worker.

use crate::config::WorkManagerConfig;
use crate::error::{CompletionFailure, RejectReason, WorkError};
use crate::lifecycle::{Lifecycle, WorkState};
use crate::listener::WorkListener;
use crate::scope::{ActiveTransactions, ExecutionScope};
use crate::stats::{Counters, WorkStats};
use crate::work::{RunContext, Work};
use async_trait::async_trait;
use connector_core::{ContextKind, ExecutionContext, StartDelay, StartTimeout, WorkId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work submission facility.
#[async_trait]
pub trait WorkManager: Send + Sync {
    /// Submit and wait until the item completes.
    async fn do_work(&self, work: Arc<dyn Work>, options: SubmitOptions) -> Result<(), WorkError>;

    /// Submit and wait until the item starts. Returns the wait between
    /// acceptance and start.
    async fn start_work(
        &self,
        work: Arc<dyn Work>,
        options: SubmitOptions,
    ) -> Result<StartDelay, WorkError>;

    /// Submit and return once the item is accepted. Completion failures are
    /// only visible through the listener.
    async fn schedule_work(
        &self,
        work: Arc<dyn Work>,
        options: SubmitOptions,
    ) -> Result<WorkId, WorkError>;

    /// Ask an accepted or running item to stop early. Returns false if the
    /// item is unknown or already finished.
    async fn release(&self, id: WorkId) -> bool;
}

/// Per-submission options.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    /// Bound on the wait between acceptance and start
    pub start_timeout: StartTimeout,
    /// Context to run the item under
    pub context: Option<ExecutionContext>,
    /// Observer of the item's lifecycle
    pub listener: Option<Arc<dyn WorkListener>>,
}

impl SubmitOptions {
    /// Indefinite start timeout, no context, no listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the start timeout.
    pub fn with_start_timeout(mut self, timeout: StartTimeout) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Set the execution context.
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the listener.
    pub fn with_listener(mut self, listener: Arc<dyn WorkListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("start_timeout", &self.start_timeout)
            .field("context", &self.context)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// How an item got past admission.
enum Admission {
    /// A worker was free at submission
    Ready(OwnedSemaphorePermit),
    /// Waiting in the queue
    Queued,
    /// No worker free and no wait allowed
    Immediate,
}

struct InFlight {
    work: Arc<dyn Work>,
    release: CancellationToken,
    hook: Arc<ReleaseHook>,
    lifecycle: Arc<Lifecycle>,
}

/// Calls an item's `release()` hook at most once.
#[derive(Debug, Default)]
struct ReleaseHook {
    fired: AtomicBool,
}

impl ReleaseHook {
    fn fire(&self, work: &dyn Work) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            work.release();
        }
    }
}

struct Shared {
    config: WorkManagerConfig,
    capacity: usize,
    permits: Arc<Semaphore>,
    supported: HashSet<ContextKind>,
    active_transactions: ActiveTransactions,
    in_flight: Mutex<HashMap<WorkId, InFlight>>,
    queued: AtomicUsize,
    running: AtomicUsize,
    pending: AtomicUsize,
    shutdown: CancellationToken,
    stats: Counters,
}

/// Work manager backed by a bounded pool of tokio tasks.
#[derive(Clone)]
pub struct PooledWorkManager {
    shared: Arc<Shared>,
}

impl PooledWorkManager {
    /// Create a new work manager.
    pub fn new(config: WorkManagerConfig) -> Self {
        let capacity = config.max_concurrent.get().min(Semaphore::MAX_PERMITS);
        let supported = config.supported_contexts.iter().cloned().collect();
        info!(
            "Work manager ready: {} workers, queue capacity {}",
            capacity, config.queue_capacity
        );

        Self {
            shared: Arc::new(Shared {
                config,
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                supported,
                active_transactions: ActiveTransactions::default(),
                in_flight: Mutex::new(HashMap::new()),
                queued: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
                stats: Counters::default(),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &WorkManagerConfig {
        &self.shared.config
    }

    /// Whether work under this context kind can be executed.
    pub fn supports(&self, kind: &ContextKind) -> bool {
        self.shared.supported.contains(kind)
    }

    /// Current counters.
    pub fn stats(&self) -> WorkStats {
        self.shared.stats.snapshot(
            self.shared.queued.load(Ordering::SeqCst),
            self.shared.running.load(Ordering::SeqCst),
        )
    }

    /// Accepted items not yet rejected or completed, whether waiting for a
    /// worker, holding one before start, or running.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Lifecycle state of an accepted item that has not finished yet.
    pub async fn state(&self, id: WorkId) -> Option<WorkState> {
        let lifecycle = self.shared.lookup(id)?.lifecycle;
        Some(lifecycle.state().await)
    }

    /// Whether shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop admitting work, reject queued items, release running items and
    /// wait up to the configured grace period for them to finish.
    ///
    /// Returns true if every running item finished within the grace period.
    pub async fn shutdown(&self) -> bool {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            debug!("Work manager already shut down");
            return shared.running.load(Ordering::SeqCst) == 0;
        }
        info!("Shutting down work manager");
        shared.shutdown.cancel();

        for (id, entry) in shared.snapshot_in_flight() {
            if entry.lifecycle.state().await == WorkState::Started {
                debug!("Releasing {} for shutdown", id);
                entry.hook.fire(entry.work.as_ref());
            }
        }

        let all = u32::try_from(shared.capacity).unwrap_or(u32::MAX);
        let grace = shared.config.shutdown_grace();
        let drained = matches!(
            tokio::time::timeout(grace, shared.permits.acquire_many(all)).await,
            Ok(Ok(_))
        );
        shared.permits.close();

        if drained {
            info!("Work manager stopped");
        } else {
            warn!(
                "Work manager stopped with {} items still running after {:?}",
                shared.running.load(Ordering::SeqCst),
                grace
            );
        }
        drained
    }

    async fn submit(&self, work: Arc<dyn Work>, options: SubmitOptions) -> Result<Submission, WorkError> {
        let shared = &self.shared;
        let id = WorkId::new();
        shared.stats.submitted();
        let lifecycle = Arc::new(Lifecycle::new(id, options.listener.clone()));
        debug!(
            "Submitting {} ({}) with start timeout {}",
            id,
            work.name(),
            options.start_timeout
        );

        let admission = match shared.admit(options.start_timeout) {
            Ok(admission) => admission,
            Err(reason) => return Err(shared.reject(&lifecycle, id, reason).await),
        };

        if let Err(e) = lifecycle.advance(WorkState::Accepted, None, None).await {
            error!("{}", e);
        }
        shared.stats.accepted();
        shared.pending.fetch_add(1, Ordering::SeqCst);

        let release = shared.shutdown.child_token();
        let hook = Arc::new(ReleaseHook::default());
        shared.track(
            id,
            InFlight {
                work: Arc::clone(&work),
                release: release.clone(),
                hook: Arc::clone(&hook),
                lifecycle: Arc::clone(&lifecycle),
            },
        );

        let (start_tx, start_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let job = Job {
            id,
            work,
            context: options.context,
            start_timeout: options.start_timeout,
            lifecycle,
            release,
            hook,
            admission,
            accepted_at: Instant::now(),
            start_tx,
            done_tx,
        };
        tokio::spawn(Arc::clone(shared).drive(job));

        Ok(Submission {
            id,
            start_rx,
            done_rx,
        })
    }
}

impl std::fmt::Debug for PooledWorkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWorkManager")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl WorkManager for PooledWorkManager {
    async fn do_work(&self, work: Arc<dyn Work>, options: SubmitOptions) -> Result<(), WorkError> {
        let mut submission = self.submit(work, options).await?;
        submission.started().await?;
        submission.completed().await
    }

    async fn start_work(
        &self,
        work: Arc<dyn Work>,
        options: SubmitOptions,
    ) -> Result<StartDelay, WorkError> {
        let mut submission = self.submit(work, options).await?;
        submission.started().await
    }

    async fn schedule_work(
        &self,
        work: Arc<dyn Work>,
        options: SubmitOptions,
    ) -> Result<WorkId, WorkError> {
        let submission = self.submit(work, options).await?;
        Ok(submission.id)
    }

    async fn release(&self, id: WorkId) -> bool {
        let Some(entry) = self.shared.lookup(id) else {
            return false;
        };
        info!("Releasing {}", id);
        entry.release.cancel();
        // Not started yet: the driver sees the token and rejects or fires
        // the hook itself.
        if entry.lifecycle.state().await == WorkState::Started {
            entry.hook.fire(entry.work.as_ref());
        }
        true
    }
}

/// Caller's side of an accepted item.
struct Submission {
    id: WorkId,
    start_rx: oneshot::Receiver<Result<StartDelay, WorkError>>,
    done_rx: oneshot::Receiver<Result<(), WorkError>>,
}

impl Submission {
    async fn started(&mut self) -> Result<StartDelay, WorkError> {
        match (&mut self.start_rx).await {
            Ok(result) => result,
            Err(_) => Err(WorkError::Rejected {
                id: self.id,
                reason: RejectReason::Internal("work driver stopped before start".to_string()),
            }),
        }
    }

    async fn completed(self) -> Result<(), WorkError> {
        match self.done_rx.await {
            Ok(result) => result,
            Err(_) => Err(WorkError::Completed {
                id: self.id,
                failure: CompletionFailure::Aborted,
            }),
        }
    }
}

/// Everything the driver task needs for one accepted item.
struct Job {
    id: WorkId,
    work: Arc<dyn Work>,
    context: Option<ExecutionContext>,
    start_timeout: StartTimeout,
    lifecycle: Arc<Lifecycle>,
    release: CancellationToken,
    hook: Arc<ReleaseHook>,
    admission: Admission,
    accepted_at: Instant,
    start_tx: oneshot::Sender<Result<StartDelay, WorkError>>,
    done_tx: oneshot::Sender<Result<(), WorkError>>,
}

impl Shared {
    fn admit(&self, timeout: StartTimeout) -> Result<Admission, RejectReason> {
        if self.shutdown.is_cancelled() {
            return Err(RejectReason::ShuttingDown);
        }

        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => return Ok(Admission::Ready(permit)),
            Err(TryAcquireError::Closed) => return Err(RejectReason::ShuttingDown),
            Err(TryAcquireError::NoPermits) => {}
        }

        if timeout.is_immediate() {
            return Ok(Admission::Immediate);
        }

        let capacity = self.config.queue_capacity;
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued < capacity).then_some(queued + 1)
            })
            .map(|_| Admission::Queued)
            .map_err(RejectReason::Capacity)
    }

    async fn reject(&self, lifecycle: &Lifecycle, id: WorkId, reason: RejectReason) -> WorkError {
        let timed_out = reason == RejectReason::StartTimedOut;
        let err = WorkError::Rejected { id, reason };
        warn!("{}", err);
        if let Err(e) = lifecycle.advance(WorkState::Rejected, None, Some(&err)).await {
            error!("{}", e);
        }
        self.stats.rejected(timed_out);
        err
    }

    async fn drive(self: Arc<Self>, job: Job) {
        let Job {
            id,
            work,
            context,
            start_timeout,
            lifecycle,
            release,
            hook,
            admission,
            accepted_at,
            start_tx,
            done_tx,
        } = job;

        let acquired = match admission {
            Admission::Ready(permit) => Ok(permit),
            Admission::Immediate => Arc::clone(&self.permits)
                .try_acquire_owned()
                .map_err(|_| RejectReason::StartTimedOut),
            Admission::Queued => {
                let acquired = self.wait_for_worker(start_timeout, &release).await;
                self.queued.fetch_sub(1, Ordering::SeqCst);
                acquired
            }
        }
        .and_then(|permit| match self.released_reason(&release) {
            Some(reason) => Err(reason),
            None => Ok(permit),
        });

        let permit = match acquired {
            Ok(permit) => permit,
            Err(reason) => {
                self.untrack(id);
                let err = self.reject(&lifecycle, id, reason).await;
                self.pending.fetch_sub(1, Ordering::SeqCst);
                let _ = start_tx.send(Err(err));
                return;
            }
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        let delay = StartDelay::Known(accepted_at.elapsed());
        if let Err(e) = lifecycle
            .advance(WorkState::Started, Some(delay), None)
            .await
        {
            error!("{}", e);
        }
        self.stats.started();
        debug!("Work {} ({}) started after {}", id, work.name(), delay);
        if release.is_cancelled() {
            hook.fire(work.as_ref());
        }

        // The context is in place before the start is acknowledged; a setup
        // failure still counts as a completion.
        let scope = ExecutionScope::establish(context, &self.supported, &self.active_transactions)
            .map_err(CompletionFailure::ContextSetup);
        let _ = start_tx.send(Ok(delay));

        let outcome = match scope {
            Ok(scope) => self.execute(id, work, scope, release, &hook).await,
            Err(failure) => Err(failure),
        }
        .map_err(|failure| WorkError::Completed { id, failure });

        match &outcome {
            Ok(()) => debug!("Work {} completed", id),
            Err(e) => warn!("{}", e),
        }
        self.untrack(id);
        if let Err(e) = lifecycle
            .advance(WorkState::Completed, None, outcome.as_ref().err())
            .await
        {
            error!("{}", e);
        }
        self.stats.finished(outcome.is_err());
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        drop(permit);

        // Nobody waits on completion for scheduled or start-acknowledged work;
        // the listener has already seen the outcome.
        let _ = done_tx.send(outcome);
    }

    async fn wait_for_worker(
        &self,
        timeout: StartTimeout,
        release: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, RejectReason> {
        tokio::select! {
            biased;
            _ = release.cancelled() => Err(self.release_reason()),
            acquired = acquire_within(Arc::clone(&self.permits), timeout.as_duration()) => acquired,
        }
    }

    fn release_reason(&self) -> RejectReason {
        if self.shutdown.is_cancelled() {
            RejectReason::ShuttingDown
        } else {
            RejectReason::Released
        }
    }

    /// Reason to reject an item that holds a worker but has not started.
    fn released_reason(&self, release: &CancellationToken) -> Option<RejectReason> {
        release.is_cancelled().then(|| self.release_reason())
    }

    async fn execute(
        &self,
        id: WorkId,
        work: Arc<dyn Work>,
        scope: ExecutionScope,
        release: CancellationToken,
        hook: &ReleaseHook,
    ) -> Result<(), CompletionFailure> {
        let transaction_timeout = scope.context().transaction_timeout();
        let run_ctx = RunContext::new(id, release.clone(), scope.context().clone());

        let runner = Arc::clone(&work);
        let mut handle = tokio::spawn(scope.run(async move { runner.run(run_ctx).await }));

        let joined = match transaction_timeout {
            None => (&mut handle).await,
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Work {} exceeded transaction timeout {:?}, releasing", id, limit);
                    release.cancel();
                    hook.fire(work.as_ref());
                    if let Err(e) = handle.await {
                        debug!("Work {} ended abnormally after release: {}", id, e);
                    }
                    return Err(CompletionFailure::TransactionTimedOut(limit));
                }
            },
        };

        match joined {
            Ok(result) => result.map_err(CompletionFailure::Run),
            Err(e) if e.is_panic() => Err(CompletionFailure::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(CompletionFailure::Aborted),
        }
    }

    fn track(&self, id: WorkId, entry: InFlight) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
    }

    fn untrack(&self, id: WorkId) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn lookup(&self, id: WorkId) -> Option<InFlight> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(InFlight::clone_handle)
    }

    fn snapshot_in_flight(&self) -> Vec<(WorkId, InFlight)> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (*id, entry.clone_handle()))
            .collect()
    }
}

impl InFlight {
    fn clone_handle(&self) -> Self {
        Self {
            work: Arc::clone(&self.work),
            release: self.release.clone(),
            hook: Arc::clone(&self.hook),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

async fn acquire_within(
    permits: Arc<Semaphore>,
    limit: Option<Duration>,
) -> Result<OwnedSemaphorePermit, RejectReason> {
    let acquire = permits.acquire_owned();
    let acquired = match limit {
        Some(limit) => match tokio::time::timeout(limit, acquire).await {
            Ok(acquired) => acquired,
            Err(_) => return Err(RejectReason::StartTimedOut),
        },
        None => acquire.await,
    };
    acquired.map_err(|_| RejectReason::ShuttingDown)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
