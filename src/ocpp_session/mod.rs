//! Outgoing-call correlation: message id → one-shot completion slot.
//!
//! Per §4.1/§9: the pending-reply mapping lives with whoever issues CALLs —
//! here, the CP client. The dispatcher (inbound-read task) resolves slots
//! when a CALLRESULT/CALLERROR with a matching id arrives; a reply for an
//! id nobody is waiting on is logged and discarded, never an error.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

/// What came back for a pending CALL: either the CALLRESULT payload or the
/// CALLERROR triple.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Result(Value),
    Error {
        error_code: String,
        error_description: String,
    },
}

type Slot = oneshot::Sender<CallOutcome>;

/// One instance per CP client connection; not `Clone`, shared behind `Arc`.
#[derive(Default)]
pub struct PendingReplies {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly-sent CALL, returning the receiver half the caller
    /// awaits for its reply.
    pub fn register(&self, unique_id: String) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().unwrap().insert(unique_id, tx);
        rx
    }

    /// Resolve a CALLRESULT. A missing slot (unknown id, or a reply that
    /// arrived after the waiter already timed out and dropped its receiver)
    /// is logged and discarded.
    pub fn resolve_result(&self, unique_id: &str, payload: Value) {
        self.resolve(unique_id, CallOutcome::Result(payload));
    }

    /// Resolve a CALLERROR.
    pub fn resolve_error(&self, unique_id: &str, error_code: String, error_description: String) {
        self.resolve(
            unique_id,
            CallOutcome::Error {
                error_code,
                error_description,
            },
        );
    }

    fn resolve(&self, unique_id: &str, outcome: CallOutcome) {
        let slot = self.slots.lock().unwrap().remove(unique_id);
        match slot {
            Some(tx) => {
                // Err means the waiter already dropped its receiver (e.g. a
                // timeout fired first); nothing to clean up beyond that.
                let _ = tx.send(outcome);
            }
            None => warn!(unique_id, "reply for unknown or already-resolved message id"),
        }
    }

    /// Number of CALLs still awaiting a reply. Exposed for tests.
    pub fn pending_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_registered_waiter() {
        let pending = PendingReplies::new();
        let rx = pending.register("id-1".into());
        pending.resolve_result("id-1", serde_json::json!({"status": "Accepted"}));

        match rx.await.unwrap() {
            CallOutcome::Result(payload) => assert_eq!(payload["status"], "Accepted"),
            CallOutcome::Error { .. } => panic!("expected a result"),
        }
    }

    #[tokio::test]
    async fn resolve_error_delivers_call_error() {
        let pending = PendingReplies::new();
        let rx = pending.register("id-2".into());
        pending.resolve_error("id-2", "InternalError".into(), "boom".into());

        match rx.await.unwrap() {
            CallOutcome::Error { error_code, .. } => assert_eq!(error_code, "InternalError"),
            CallOutcome::Result(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn resolve_for_unknown_id_does_not_panic() {
        let pending = PendingReplies::new();
        pending.resolve_result("never-registered", serde_json::json!({}));
        assert_eq!(pending.pending_count(), 0);
    }

    #[test]
    fn register_tracks_pending_count() {
        let pending = PendingReplies::new();
        let _rx1 = pending.register("a".into());
        let _rx2 = pending.register("b".into());
        assert_eq!(pending.pending_count(), 2);
        pending.resolve_result("a", serde_json::json!({}));
        assert_eq!(pending.pending_count(), 1);
    }
}
