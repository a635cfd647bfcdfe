//! Benchmark orchestration
//!
//! Each case installs one [`PendingExpectation`] and then races the reply
//! against the case timeout. Only one expectation exists per orchestrator at
//! a time: a second run while one is in progress is rejected with
//! [`BenchError::AlreadyRunning`].
//!
//! LLM expectations are answered by `system_response` or `error` messages on
//! the shared channel. Ground-truth expectations are answered by the
//! side-channel reference endpoint and never touch the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cm_core::error::ConnectionError;
use cm_core::time::current_time_millis;
use cm_core::traits::Backend;
use cm_core::{ExpectationKind, TestCase};
use cm_protocol::{InboundMessage, OutboundMessage};

use super::pending::{PendingExpectation, Resolution};
use super::report::{CaseOutcome, CaseResult, CaseStatus, ResultsExport};
use super::suite::TestSuite;
use super::BenchError;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::viewer::{ModelView, RenderBackend, ViewState};

/// Capacity of the benchmark event channel.
const BENCH_EVENT_CHANNEL_CAPACITY: usize = 64;

type CurrentExpectation = Arc<Mutex<Option<Arc<PendingExpectation>>>>;

/// Progress notifications
#[derive(Debug, Clone, PartialEq)]
pub enum BenchEvent {
    CaseStarted {
        case_id: String,
        kind: ExpectationKind,
    },
    CaseFinished {
        case_id: String,
        kind: ExpectationKind,
        status: CaseStatus,
    },
}

struct Viewport {
    status: CaseStatus,
    view: ModelView,
}

/// Clears the running flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, BenchError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BenchError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs test cases against one shared channel
pub struct TestOrchestrator {
    connection: Arc<ConnectionManager>,
    backend: Arc<dyn Backend>,
    renderer: Arc<dyn RenderBackend>,
    inter_case_delay: Duration,
    running: AtomicBool,
    current: CurrentExpectation,
    viewports: DashMap<(String, ExpectationKind), Viewport>,
    results: Mutex<IndexMap<String, CaseResult>>,
    cancel: Mutex<CancellationToken>,
    events: broadcast::Sender<BenchEvent>,
    listener: JoinHandle<()>,
}

impl TestOrchestrator {
    /// Create an orchestrator listening on `connection`
    pub fn new(
        connection: Arc<ConnectionManager>,
        backend: Arc<dyn Backend>,
        renderer: Arc<dyn RenderBackend>,
        inter_case_delay: Duration,
    ) -> Self {
        let current: CurrentExpectation = Arc::new(Mutex::new(None));
        let listener = tokio::spawn(listen(connection.subscribe(), current.clone()));
        let (events, _) = broadcast::channel(BENCH_EVENT_CHANNEL_CAPACITY);

        Self {
            connection,
            backend,
            renderer,
            inter_case_delay,
            running: AtomicBool::new(false),
            current,
            viewports: DashMap::new(),
            results: Mutex::new(IndexMap::new()),
            cancel: Mutex::new(CancellationToken::new()),
            events,
            listener,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BenchEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a single case
    pub async fn run_case(
        &self,
        case: &TestCase,
        kind: ExpectationKind,
    ) -> Result<CaseStatus, BenchError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let cancel = self.cancel.lock().clone();
        self.execute(case, kind, &cancel).await
    }

    /// Run the case named `id` from `suite`
    pub async fn run_named(
        &self,
        suite: &TestSuite,
        id: &str,
        kind: ExpectationKind,
    ) -> Result<CaseStatus, BenchError> {
        let case = suite
            .get(id)
            .ok_or_else(|| BenchError::UnknownCase(id.to_string()))?;
        self.run_case(case, kind).await
    }

    /// Run every case in order, pausing between cases
    ///
    /// Case `i + 1` is only issued after case `i` has resolved.
    pub async fn run_sequential(
        &self,
        suite: &TestSuite,
        kind: ExpectationKind,
    ) -> Result<Vec<(String, CaseStatus)>, BenchError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let cancel = self.cancel.lock().clone();

        tracing::info!(cases = suite.len(), %kind, "Starting sequential run");
        let mut statuses = Vec::with_capacity(suite.len());
        for (i, case) in suite.cases().iter().enumerate() {
            if i > 0 && !self.inter_case_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.inter_case_delay) => {}
                    _ = cancel.cancelled() => return Err(BenchError::Cancelled),
                }
            }
            let status = self.execute(case, kind, &cancel).await?;
            statuses.push((case.id.clone(), status));
        }
        Ok(statuses)
    }

    /// Abandon the current run; the case in flight is not recorded
    pub fn cancel(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Run one case to resolution
    ///
    /// An LLM case whose prompt cannot be sent because the channel is down
    /// resolves as a timeout, the same as a channel drop while it is pending.
    async fn execute(
        &self,
        case: &TestCase,
        kind: ExpectationKind,
        cancel: &CancellationToken,
    ) -> Result<CaseStatus, BenchError> {
        self.results
            .lock()
            .entry(case.id.clone())
            .or_insert_with(|| CaseResult::new(&case.name));
        {
            let mut viewport = self.viewport(&case.id, kind);
            viewport.status = CaseStatus::Awaiting;
            viewport.view.update(None);
        }
        tracing::info!(case_id = %case.id, %kind, timeout = ?case.timeout, "Running case");
        self.emit(BenchEvent::CaseStarted {
            case_id: case.id.clone(),
            kind,
        });

        let started = Instant::now();
        let (pending, outcome) = PendingExpectation::install(kind, case);
        *self.current.lock() = Some(pending.clone());

        match kind {
            ExpectationKind::Llm => {
                match self.connection.send(&OutboundMessage::user(case.prompt.clone())) {
                    Ok(()) => {}
                    Err(ConnectionError::NotConnected) => {
                        tracing::warn!(case_id = %case.id, "Channel not connected, case cannot be sent");
                        pending.resolve(Resolution::TimedOut);
                    }
                    Err(e) => {
                        pending.resolve(Resolution::Failed(e.to_string()));
                    }
                }
            }
            ExpectationKind::GroundTruth => {
                tokio::spawn(run_reference(
                    self.backend.clone(),
                    pending.clone(),
                    case.id.clone(),
                    case.reference_procedure.clone(),
                ));
            }
        }

        let resolution = tokio::select! {
            resolution = outcome => resolution.ok(),
            _ = cancel.cancelled() => {
                pending.cancel();
                None
            }
        };
        self.clear_current(&pending);

        let Some(resolution) = resolution else {
            tracing::info!(case_id = %case.id, %kind, "Case cancelled");
            return Err(BenchError::Cancelled);
        };
        Ok(self.record(case, kind, resolution, started.elapsed()))
    }

    fn clear_current(&self, pending: &Arc<PendingExpectation>) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, pending)) {
            *current = None;
        }
    }

    fn record(
        &self,
        case: &TestCase,
        kind: ExpectationKind,
        resolution: Resolution,
        elapsed: Duration,
    ) -> CaseStatus {
        let (status, message) = {
            let mut viewport = self.viewport(&case.id, kind);
            let (status, message) = match resolution {
                Resolution::Delivered(Some(mut model)) => {
                    model.source_test_case_id = Some(case.id.clone());
                    let has_mesh = model.has_mesh();
                    match viewport.view.update(Some(&model)) {
                        ViewState::Rendered => (CaseStatus::Success, None),
                        _ if has_mesh => (
                            CaseStatus::NoModel,
                            Some("mesh data could not be decoded".to_string()),
                        ),
                        _ => (CaseStatus::NoModel, None),
                    }
                }
                Resolution::Delivered(None) => (CaseStatus::NoModel, None),
                Resolution::Failed(message) => (CaseStatus::Error, Some(message)),
                // The placeholder stays up
                Resolution::TimedOut => (CaseStatus::Timeout, None),
            };
            viewport.status = status;
            (status, message)
        };

        let outcome = CaseOutcome {
            status,
            message,
            elapsed_ms: elapsed.as_millis() as u64,
        };
        self.results
            .lock()
            .entry(case.id.clone())
            .or_insert_with(|| CaseResult::new(&case.name))
            .set(kind, outcome);

        match status {
            CaseStatus::Success | CaseStatus::NoModel => {
                tracing::info!(case_id = %case.id, %kind, %status, "Case finished")
            }
            _ => tracing::warn!(case_id = %case.id, %kind, %status, "Case finished"),
        }
        self.emit(BenchEvent::CaseFinished {
            case_id: case.id.clone(),
            kind,
            status,
        });
        status
    }

    fn viewport(
        &self,
        case_id: &str,
        kind: ExpectationKind,
    ) -> dashmap::mapref::one::RefMut<'_, (String, ExpectationKind), Viewport> {
        self.viewports
            .entry((case_id.to_string(), kind))
            .or_insert_with(|| Viewport {
                status: CaseStatus::Awaiting,
                view: ModelView::new(self.renderer.clone()),
            })
    }

    /// Recorded results in the order cases were first run
    pub fn results(&self) -> IndexMap<String, CaseResult> {
        self.results.lock().clone()
    }

    /// Forget every result and reset every viewport to `Awaiting`
    ///
    /// The channel is left untouched.
    pub fn clear_results(&self) {
        self.results.lock().clear();
        for mut viewport in self.viewports.iter_mut() {
            viewport.status = CaseStatus::Awaiting;
            viewport.view.clear();
        }
        tracing::debug!("Benchmark results cleared");
    }

    /// Results as pretty JSON
    pub fn export_results(&self) -> Result<String, BenchError> {
        let results = self.results.lock();
        let export = ResultsExport {
            exported_at: current_time_millis(),
            results: &results,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    pub fn viewport_status(&self, case_id: &str, kind: ExpectationKind) -> Option<CaseStatus> {
        self.viewports
            .get(&(case_id.to_string(), kind))
            .map(|v| v.status)
    }

    /// Inspect the model view of one case
    pub fn with_viewport<R>(
        &self,
        case_id: &str,
        kind: ExpectationKind,
        f: impl FnOnce(&ModelView) -> R,
    ) -> Option<R> {
        self.viewports
            .get(&(case_id.to_string(), kind))
            .map(|v| f(&v.view))
    }

    fn emit(&self, event: BenchEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for TestOrchestrator {
    fn drop(&mut self) {
        self.listener.abort();
        if let Some(pending) = self.current.lock().take() {
            pending.cancel();
        }
    }
}

/// Resolve LLM expectations from channel traffic
async fn listen(mut inbound: broadcast::Receiver<ConnectionEvent>, current: CurrentExpectation) {
    loop {
        let resolution = match inbound.recv().await {
            Ok(ConnectionEvent::Message(InboundMessage::SystemResponse(response))) => {
                Resolution::Delivered(response.model_state)
            }
            Ok(ConnectionEvent::Message(InboundMessage::Error(error))) => {
                Resolution::Failed(error.message)
            }
            Ok(ConnectionEvent::Closed { clean: false } | ConnectionEvent::GaveUp { .. }) => {
                Resolution::TimedOut
            }
            Ok(_) => continue,
            // The reply may be among the dropped events
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Benchmark listener lagged, {} events dropped", skipped);
                Resolution::TimedOut
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let pending = current
            .lock()
            .clone()
            .filter(|p| p.kind() == ExpectationKind::Llm);
        match pending {
            Some(pending) => {
                if matches!(resolution, Resolution::TimedOut) {
                    tracing::warn!(case_id = %pending.case_id(), "Channel lost while case pending");
                }
                pending.resolve(resolution);
            }
            None => tracing::debug!("No benchmark expectation pending, ignoring message"),
        }
    }
}

async fn run_reference(
    backend: Arc<dyn Backend>,
    pending: Arc<PendingExpectation>,
    case_id: String,
    procedure: String,
) {
    let resolution = match backend.execute_reference(&case_id, &procedure).await {
        Ok(execution) if execution.success => Resolution::Delivered(execution.model_state()),
        Ok(execution) => Resolution::Failed(
            execution
                .error
                .unwrap_or_else(|| "Reference procedure failed".to_string()),
        ),
        Err(e) => Resolution::Failed(e.to_string()),
    };
    pending.resolve(resolution);
}
