//! Single-resolution correlation between a request and its outcome
//!
//! A [`PendingExpectation`] is settled exactly once. The first caller to flip
//! the `resolved` flag wins: it stops the timer and hands the outcome to the
//! waiting side. Every later attempt, whether a late message or a timer that
//! fired in the same instant, is a no-op that returns `false`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use cm_core::{ExpectationKind, TestCase};
use cm_protocol::ModelState;

/// How an expectation was settled
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A reply arrived; it may or may not carry a model
    Delivered(Option<ModelState>),
    /// The backend reported a failure
    Failed(String),
    /// Nothing arrived in time, or the channel dropped first
    TimedOut,
}

/// In-flight wait for one case's response
pub struct PendingExpectation {
    kind: ExpectationKind,
    case_id: String,
    resolved: AtomicBool,
    resolver: Mutex<Option<oneshot::Sender<Resolution>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PendingExpectation {
    /// Create an expectation and arm its timer with the case timeout
    pub fn install(
        kind: ExpectationKind,
        case: &TestCase,
    ) -> (Arc<Self>, oneshot::Receiver<Resolution>) {
        Self::with_timeout(kind, &case.id, case.timeout)
    }

    pub fn with_timeout(
        kind: ExpectationKind,
        case_id: &str,
        timeout: Duration,
    ) -> (Arc<Self>, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Self {
            kind,
            case_id: case_id.to_string(),
            resolved: AtomicBool::new(false),
            resolver: Mutex::new(Some(tx)),
            timer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&pending);
        let timer = tokio::spawn(expire_after(weak, timeout));
        *pending.timer.lock() = Some(timer);

        (pending, rx)
    }

    pub fn kind(&self) -> ExpectationKind {
        self.kind
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Settle with `resolution`; `false` if already settled
    pub fn resolve(&self, resolution: Resolution) -> bool {
        self.settle(Some(resolution), true)
    }

    /// Settle without an outcome; the waiting side sees its receiver closed
    pub fn cancel(&self) -> bool {
        self.settle(None, true)
    }

    fn settle(&self, resolution: Option<Resolution>, stop_timer: bool) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(case_id = %self.case_id, kind = %self.kind, "Ignoring late resolution");
            return false;
        }

        let timer = self.timer.lock().take();
        if stop_timer {
            if let Some(timer) = timer {
                timer.abort();
            }
        }

        let resolver = self.resolver.lock().take();
        if let (Some(tx), Some(resolution)) = (resolver, resolution) {
            // The waiter may have gone away; nothing to do then
            let _ = tx.send(resolution);
        }
        true
    }
}

impl Drop for PendingExpectation {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for PendingExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingExpectation")
            .field("kind", &self.kind)
            .field("case_id", &self.case_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

async fn expire_after(pending: Weak<PendingExpectation>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(pending) = pending.upgrade() {
        if pending.settle(Some(Resolution::TimedOut), false) {
            tracing::info!(case_id = %pending.case_id, kind = %pending.kind, "Expectation timed out");
        }
    }
}
