//! Work lifecycle listeners.

use crate::error::WorkError;
use connector_core::{StartDelay, Time, WorkId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkEventKind {
    /// Accepted for processing
    Accepted,
    /// Rejected, at submission or before start
    Rejected,
    /// Execution started
    Started,
    /// Execution finished, with or without failure
    Completed,
}

impl std::fmt::Display for WorkEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkEventKind::Accepted => write!(f, "accepted"),
            WorkEventKind::Rejected => write!(f, "rejected"),
            WorkEventKind::Started => write!(f, "started"),
            WorkEventKind::Completed => write!(f, "completed"),
        }
    }
}

/// A lifecycle event, borrowed for the duration of the callback.
#[derive(Debug)]
pub struct WorkEvent<'a> {
    /// What happened
    pub kind: WorkEventKind,
    /// Affected item
    pub work_id: WorkId,
    /// When it happened
    pub timestamp: Time,
    /// Wait between acceptance and start (started events only)
    pub start_delay: Option<StartDelay>,
    /// Failure (rejected events, and completed events that failed)
    pub error: Option<&'a WorkError>,
}

/// Observer of one or more submitted items.
///
/// Callbacks run synchronously on the task performing the transition and
/// never overlap for a single item. Each item produces exactly one terminal
/// event (rejected or completed). Callbacks should return quickly.
pub trait WorkListener: Send + Sync {
    /// The item was accepted.
    fn work_accepted(&self, _event: &WorkEvent<'_>) {}

    /// The item was rejected.
    fn work_rejected(&self, _event: &WorkEvent<'_>) {}

    /// The item started.
    fn work_started(&self, _event: &WorkEvent<'_>) {}

    /// The item completed.
    fn work_completed(&self, _event: &WorkEvent<'_>) {}
}

pub(crate) fn dispatch(listener: &dyn WorkListener, event: &WorkEvent<'_>) {
    match event.kind {
        WorkEventKind::Accepted => listener.work_accepted(event),
        WorkEventKind::Rejected => listener.work_rejected(event),
        WorkEventKind::Started => listener.work_started(event),
        WorkEventKind::Completed => listener.work_completed(event),
    }
}

/// Owned copy of a [`WorkEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// What happened
    pub kind: WorkEventKind,
    /// Affected item
    pub work_id: WorkId,
    /// When it happened
    pub timestamp: Time,
    /// Start delay in milliseconds (-1 when unknown)
    pub start_delay_ms: Option<i64>,
    /// Error message, if any
    pub error: Option<String>,
    /// Error code, if any
    pub error_code: Option<i32>,
}

impl From<&WorkEvent<'_>> for EventRecord {
    fn from(event: &WorkEvent<'_>) -> Self {
        Self {
            kind: event.kind,
            work_id: event.work_id,
            timestamp: event.timestamp,
            start_delay_ms: event.start_delay.map(|d| d.as_millis()),
            error: event.error.map(|e| e.to_string()),
            error_code: event.error.map(|e| e.code()),
        }
    }
}

/// Listener that keeps every event it observes.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<EventRecord>>,
}

impl RecordingListener {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far, in observation order.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Event kinds observed for one item.
    pub fn kinds_for(&self, work_id: WorkId) -> Vec<WorkEventKind> {
        self.events()
            .into_iter()
            .filter(|e| e.work_id == work_id)
            .map(|e| e.kind)
            .collect()
    }

    fn record(&self, event: &WorkEvent<'_>) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.into());
    }
}

impl WorkListener for RecordingListener {
    fn work_accepted(&self, event: &WorkEvent<'_>) {
        self.record(event);
    }

    fn work_rejected(&self, event: &WorkEvent<'_>) {
        self.record(event);
    }

    fn work_started(&self, event: &WorkEvent<'_>) {
        self.record(event);
    }

    fn work_completed(&self, event: &WorkEvent<'_>) {
        self.record(event);
    }
}

/// Listener that forwards events to an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<EventRecord>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: &WorkEvent<'_>) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.tx.send(event.into());
    }
}

impl WorkListener for ChannelListener {
    fn work_accepted(&self, event: &WorkEvent<'_>) {
        self.forward(event);
    }

    fn work_rejected(&self, event: &WorkEvent<'_>) {
        self.forward(event);
    }

    fn work_started(&self, event: &WorkEvent<'_>) {
        self.forward(event);
    }

    fn work_completed(&self, event: &WorkEvent<'_>) {
        self.forward(event);
    }
}
