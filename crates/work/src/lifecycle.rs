//! Per-item lifecycle state machine.
//!
//! ```text
//! Submitted ──► Accepted ──► Started ──► Completed
//!     │             │
//!     └─► Rejected ◄┘
//! ```

use crate::error::WorkError;
use crate::listener::{dispatch, WorkEvent, WorkEventKind, WorkListener};
use connector_core::{StartDelay, WorkId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

/// Lifecycle state of a submitted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkState {
    /// Handed to the manager, not yet admitted
    Submitted,
    /// Admitted, waiting for a worker
    Accepted,
    /// Running on a worker
    Started,
    /// Terminal: never ran
    Rejected,
    /// Terminal: ran, with or without failure
    Completed,
}

impl WorkState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: WorkState) -> bool {
        matches!(
            (self, next),
            (WorkState::Submitted, WorkState::Accepted)
                | (WorkState::Submitted, WorkState::Rejected)
                | (WorkState::Accepted, WorkState::Started)
                | (WorkState::Accepted, WorkState::Rejected)
                | (WorkState::Started, WorkState::Completed)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkState::Rejected | WorkState::Completed)
    }

    fn event_kind(self) -> Option<WorkEventKind> {
        match self {
            WorkState::Submitted => None,
            WorkState::Accepted => Some(WorkEventKind::Accepted),
            WorkState::Started => Some(WorkEventKind::Started),
            WorkState::Rejected => Some(WorkEventKind::Rejected),
            WorkState::Completed => Some(WorkEventKind::Completed),
        }
    }
}

/// An illegal lifecycle transition was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("work {work_id}: illegal transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// Affected item
    pub work_id: WorkId,
    /// Current state
    pub from: WorkState,
    /// Requested state
    pub to: WorkState,
}

/// Guarded state holder that notifies the item's listener on each transition.
pub(crate) struct Lifecycle {
    work_id: WorkId,
    state: Mutex<WorkState>,
    listener: Option<Arc<dyn WorkListener>>,
}

impl Lifecycle {
    pub(crate) fn new(work_id: WorkId, listener: Option<Arc<dyn WorkListener>>) -> Self {
        Self {
            work_id,
            state: Mutex::new(WorkState::Submitted),
            listener,
        }
    }

    /// Move to `to` and notify the listener while the state lock is held, so
    /// events for one item are delivered once each and in order.
    pub(crate) async fn advance(
        &self,
        to: WorkState,
        start_delay: Option<StartDelay>,
        error: Option<&WorkError>,
    ) -> Result<(), InvalidTransition> {
        let mut state = self.state.lock().await;
        if !state.can_transition_to(to) {
            return Err(InvalidTransition {
                work_id: self.work_id,
                from: *state,
                to,
            });
        }
        *state = to;

        if let (Some(listener), Some(kind)) = (&self.listener, to.event_kind()) {
            let event = WorkEvent {
                kind,
                work_id: self.work_id,
                timestamp: chrono::Utc::now(),
                start_delay,
                error,
            };
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                dispatch(listener.as_ref(), &event)
            }));
            if outcome.is_err() {
                error!("Listener panicked handling {} event for {}", kind, self.work_id);
            }
        }

        Ok(())
    }

    pub(crate) async fn state(&self) -> WorkState {
        *self.state.lock().await
    }
}
