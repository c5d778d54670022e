//! Progress events
//!
//! The engine never prints. Callers that want progress pass an
//! [`EventSink`] and drain the receiving end of the channel.

use std::fmt;

use tokio::sync::mpsc;

use crate::diff::ChangeOp;

/// Event emitted while applying changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyEvent {
    /// A batch of changes is about to start
    BatchStarted {
        index: usize,
        total: usize,
        changes: usize,
    },
    ChangeStarted { op: ChangeOp, resource: String },
    /// Convergence not reached yet; only emitted when the message changes
    Waiting { resource: String, message: String },
    ChangeConverged { op: ChangeOp, resource: String },
    ChangeFailed {
        op: ChangeOp,
        resource: String,
        error: String,
    },
    Retrying {
        op: ChangeOp,
        resource: String,
        attempt: usize,
        error: String,
    },
    /// Ignored change left alone
    Skipped { op: ChangeOp, resource: String },
    HistoryPruned { removed: usize },
}

impl fmt::Display for ApplyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyEvent::BatchStarted {
                index,
                total,
                changes,
            } => write!(f, "---- applying {} changes [{}/{}] ----", changes, index + 1, total),
            ApplyEvent::ChangeStarted { op, resource } => write!(f, "{} {}", op, resource),
            ApplyEvent::Waiting { resource, message } => {
                write!(f, "waiting on {}: {}", resource, message)
            }
            ApplyEvent::ChangeConverged { op, resource } => {
                write!(f, "ok: {} {}", op, resource)
            }
            ApplyEvent::ChangeFailed { op, resource, error } => {
                write!(f, "failed: {} {}: {}", op, resource, error)
            }
            ApplyEvent::Retrying {
                op,
                resource,
                attempt,
                error,
            } => write!(f, "retrying {} {} (attempt {}): {}", op, resource, attempt, error),
            ApplyEvent::Skipped { op, resource } => {
                write!(f, "skipped ignored: {} {}", op, resource)
            }
            ApplyEvent::HistoryPruned { removed } => {
                write!(f, "pruned {} old history entries", removed)
            }
        }
    }
}

/// Optional sending half of an event channel
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ApplyEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ApplyEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A sink together with the receiver for its events
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ApplyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: ApplyEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(ApplyEvent::HistoryPruned { removed: 1 });
        sink.emit(ApplyEvent::HistoryPruned { removed: 2 });
        assert_eq!(rx.try_recv().unwrap(), ApplyEvent::HistoryPruned { removed: 1 });
        assert_eq!(rx.try_recv().unwrap(), ApplyEvent::HistoryPruned { removed: 2 });
    }

    #[test]
    fn test_disabled_and_closed_sinks_do_not_panic() {
        EventSink::disabled().emit(ApplyEvent::HistoryPruned { removed: 0 });
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(ApplyEvent::HistoryPruned { removed: 0 });
    }

    #[test]
    fn test_display() {
        let event = ApplyEvent::BatchStarted {
            index: 0,
            total: 2,
            changes: 3,
        };
        assert_eq!(event.to_string(), "---- applying 3 changes [1/2] ----");
        let event = ApplyEvent::ChangeStarted {
            op: ChangeOp::Add,
            resource: "configmap/a (v1) namespace: ns1".into(),
        };
        assert_eq!(event.to_string(), "create configmap/a (v1) namespace: ns1");
    }
}
