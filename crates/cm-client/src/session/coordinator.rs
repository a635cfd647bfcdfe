//! Session coordinator
//!
//! The `SessionCoordinator` obtains a session id through a one-shot request,
//! binds a [`ConnectionManager`] to it and turns inbound messages into
//! [`SessionEvent`]s.
//!
//! # Outstanding requests
//!
//! At most one user message is outstanding at a time. The slot is checked and
//! claimed under a single lock acquisition with no suspension point in
//! between, so a second send while the first is pending is rejected with
//! [`SessionError::Busy`] before the transport is touched.
//!
//! The slot is released exactly once, by whichever comes first of:
//! - a `system_response` or `error` message
//! - the local response timeout
//! - an unclean close of the channel
//! - inbound events lost because the dispatcher fell behind
//!
//! # Side-channel refresh
//!
//! `parameter_update` and `session_state` pushes are followed by pulls of the
//! parameter set and the operation history. Pulled data only repopulates
//! views; it never overrides pushed state.
//!
//! Pulls run on a separate refresh task so a slow backend never holds up
//! inbound dispatch. Pushes that arrive while a pull is running coalesce
//! into one follow-up pull.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use cm_core::config::ClientConfig;
use cm_core::error::{BackendError, SessionError};
use cm_core::traits::Backend;
use cm_core::ExportFormat;
use cm_protocol::{
    EditRequest, EditResponse, GeometrySelection, InboundMessage, ModelInfo, OutboundMessage,
    ParameterUpdateResult, SessionId,
};

use super::events::SessionEvent;
use crate::connection::{ConnectionEvent, ConnectionManager};

/// Capacity of the session event channel.
const SESSION_EVENT_CHANNEL_CAPACITY: usize = 256;

struct InFlight {
    id: u64,
    timer: JoinHandle<()>,
}

/// Binds one backend session to one duplex channel
pub struct SessionCoordinator {
    session_id: SessionId,
    backend: Arc<dyn Backend>,
    connection: Arc<ConnectionManager>,
    response_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
    model_info: RwLock<Option<ModelInfo>>,
    in_flight: Mutex<Option<InFlight>>,
    request_seq: AtomicU64,
    parameters: RwLock<Option<Value>>,
    operations: RwLock<Vec<Value>>,
    refresh: Arc<Notify>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    /// Establish a session and open its channel
    ///
    /// Fails with [`SessionError::Initialization`] when no session id can be
    /// obtained; no channel is opened in that case.
    pub async fn start(
        backend: Arc<dyn Backend>,
        connection: Arc<ConnectionManager>,
        config: &ClientConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let start = backend
            .start_session()
            .await
            .map_err(SessionError::Initialization)?;
        let session_id = SessionId::new(start.session_id);
        tracing::info!(session_id = %session_id.short(), "Session established");

        let model_info = match start.model_info {
            Some(info) => Some(info),
            None => match backend.model_info().await {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!("Could not fetch model info: {}", e);
                    None
                }
            },
        };

        let (events, _) = broadcast::channel(SESSION_EVENT_CHANNEL_CAPACITY);
        let coordinator = Arc::new(Self {
            session_id: session_id.clone(),
            backend,
            connection: connection.clone(),
            response_timeout: config.response_timeout,
            events,
            model_info: RwLock::new(model_info),
            in_flight: Mutex::new(None),
            request_seq: AtomicU64::new(0),
            parameters: RwLock::new(None),
            operations: RwLock::new(Vec::new()),
            refresh: Arc::new(Notify::new()),
            dispatcher: Mutex::new(None),
            refresher: Mutex::new(None),
        });

        let refresher = tokio::spawn(refresh_loop(
            Arc::downgrade(&coordinator),
            coordinator.refresh.clone(),
        ));
        *coordinator.refresher.lock() = Some(refresher);

        // Subscribe before connecting so the open event is not missed
        let inbound = connection.subscribe();
        let task = tokio::spawn(dispatch_loop(Arc::downgrade(&coordinator), inbound));
        *coordinator.dispatcher.lock() = Some(task);

        connection.connect(session_id).await;
        Ok(coordinator)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Whether a user request is outstanding
    pub fn is_processing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.model_info.read().clone()
    }

    /// Last pulled parameter set
    pub fn parameters(&self) -> Option<Value> {
        self.parameters.read().clone()
    }

    /// Last pulled operation history
    pub fn operations(&self) -> Vec<Value> {
        self.operations.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send a user message, scoped to `selection` when given
    ///
    /// Rejected with [`SessionError::Busy`] while another message is
    /// outstanding.
    ///
    /// Replies carry no request id, so the next `system_response` or `error`
    /// releases whatever request is outstanding at that moment. A reply that
    /// arrives after its own request timed out therefore completes the
    /// request sent after it.
    pub fn send_user_message(
        self: &Arc<Self>,
        content: impl Into<String>,
        selection: Option<GeometrySelection>,
    ) -> Result<(), SessionError> {
        let mut slot = self.in_flight.lock();
        if slot.is_some() {
            tracing::debug!("Rejecting user message while another is outstanding");
            return Err(SessionError::Busy);
        }

        self.connection.send(&OutboundMessage::UserMessage {
            content: content.into(),
            selected_geometry: selection,
        })?;

        let id = self.request_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = tokio::spawn(response_timer(
            Arc::downgrade(self),
            id,
            self.response_timeout,
        ));
        *slot = Some(InFlight { id, timer });
        drop(slot);

        self.emit(SessionEvent::ProcessingChanged(true));
        Ok(())
    }

    /// Push a parameter change; not subject to the outstanding-request gate
    pub fn update_parameter(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), SessionError> {
        self.connection.send(&OutboundMessage::ParameterUpdate {
            parameter_name: name.into(),
            new_value: value,
        })?;
        Ok(())
    }

    /// Ask the backend to push a session snapshot
    pub fn request_state(&self) -> Result<(), SessionError> {
        self.connection.send(&OutboundMessage::GetState)?;
        Ok(())
    }

    /// Pull parameters and operation history
    pub async fn refresh_views(&self) -> Result<(), SessionError> {
        let parameters = self.backend.parameters(&self.session_id).await?;
        let operations = self.backend.operations(&self.session_id).await?;

        *self.parameters.write() = Some(parameters);
        *self.operations.write() = operations;
        self.emit(SessionEvent::ViewsRefreshed);
        Ok(())
    }

    /// Export the current model
    pub async fn export(&self, format: ExportFormat) -> Result<Bytes, SessionError> {
        Ok(self.backend.export(&self.session_id, format).await?)
    }

    /// Run an edit-session operation
    ///
    /// A regenerated model in a successful response is published like any
    /// other model update. An unsuccessful response becomes
    /// [`BackendError::Domain`].
    pub async fn edit(&self, request: &EditRequest) -> Result<EditResponse, SessionError> {
        let response = self.backend.edit(&self.session_id, request).await?;
        if !response.success {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| format!("{} failed", request.action()));
            return Err(BackendError::Domain(message).into());
        }

        if let Some(model) = response.regenerated_model() {
            self.emit(SessionEvent::ModelUpdated(Arc::new(model.clone())));
        } else if request.regenerates() {
            tracing::warn!(action = request.action(), "Edit applied but regeneration failed");
        }
        Ok(response)
    }

    /// Stop dispatching and close the channel
    ///
    /// An outstanding request is dropped and `ProcessingChanged(false)` is
    /// published for it.
    pub async fn close(&self) {
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
        if let Some(task) = self.refresher.lock().take() {
            task.abort();
        }
        let in_flight = self.in_flight.lock().take();
        if let Some(in_flight) = in_flight {
            in_flight.timer.abort();
            self.emit(SessionEvent::ProcessingChanged(false));
        }
        self.connection.disconnect().await;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Release the outstanding-request slot
    ///
    /// With `Some(id)` only that request is released. Returns whether a slot
    /// was released by this call.
    fn finish_request(&self, id: Option<u64>) -> bool {
        let released = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(current) if id.map_or(true, |id| id == current.id) => slot.take(),
                _ => None,
            }
        };

        match released {
            Some(in_flight) => {
                if id.is_none() {
                    in_flight.timer.abort();
                }
                self.emit(SessionEvent::ProcessingChanged(false));
                true
            }
            None => false,
        }
    }

    fn handle_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(message) => self.dispatch(message),
            ConnectionEvent::Opened { .. } => self.emit(SessionEvent::Connected),
            ConnectionEvent::Closed { clean } => {
                if !clean && self.finish_request(None) {
                    tracing::warn!("Channel dropped with a request outstanding");
                    self.emit(SessionEvent::RequestAbandoned);
                }
                self.emit(SessionEvent::Disconnected { clean });
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                self.emit(SessionEvent::Reconnecting { attempt, delay });
            }
            ConnectionEvent::GaveUp { attempts } => {
                if self.finish_request(None) {
                    self.emit(SessionEvent::RequestAbandoned);
                }
                self.emit(SessionEvent::ConnectionLost { attempts });
            }
            ConnectionEvent::Error { message } => {
                tracing::debug!("Transport error: {}", message);
            }
        }
    }

    /// Recover after the dispatcher missed `skipped` events
    ///
    /// A lost reply would leave the outstanding request waiting for its
    /// timer, so the request is abandoned and a fresh snapshot is requested.
    fn handle_lag(&self, skipped: u64) {
        tracing::warn!("Session dispatcher lagged, {} events dropped", skipped);
        if self.finish_request(None) {
            self.emit(SessionEvent::RequestAbandoned);
        }
        if let Err(e) = self.request_state() {
            tracing::debug!("Could not request a snapshot after lag: {}", e);
        }
    }

    /// Route one inbound message
    ///
    /// Never waits on the backend; pulls are handed to the refresh task.
    pub(crate) fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::SystemResponse(response) => {
                if !self.finish_request(None) {
                    tracing::debug!("Response arrived with no request outstanding");
                }
                if let Some(model) = &response.model_state {
                    self.emit(SessionEvent::ModelUpdated(Arc::new(model.clone())));
                }
                self.emit(SessionEvent::Response(Arc::new(response)));
            }
            InboundMessage::Error(error) => {
                self.finish_request(None);
                tracing::warn!("Backend error: {}", error.message);
                self.emit(SessionEvent::Error {
                    message: error.message,
                });
            }
            InboundMessage::ParameterUpdate(update) => {
                self.apply_parameter_update(update);
                self.refresh.notify_one();
            }
            InboundMessage::SessionState(state) => {
                if let Some(model) = state.model_state {
                    self.emit(SessionEvent::ModelUpdated(Arc::new(model)));
                }
                self.emit(SessionEvent::StateSynced {
                    backend_processing: state.is_processing,
                });
                self.refresh.notify_one();
            }
            InboundMessage::ModelInfo(info) => {
                tracing::info!(provider = %info.provider, model = %info.model_name, "Model info updated");
                *self.model_info.write() = Some(info.clone());
                self.emit(SessionEvent::ModelInfoChanged(info));
            }
        }
    }

    fn apply_parameter_update(&self, update: ParameterUpdateResult) {
        let result = update.execution_result;
        if !result.is_success() {
            let message = result
                .error_message
                .unwrap_or_else(|| format!("Failed to update {}", update.parameter_name));
            tracing::warn!(parameter = %update.parameter_name, "Parameter update failed: {}", message);
            self.emit(SessionEvent::Error { message });
            return;
        }

        if let Some(model) = result.model_data {
            self.emit(SessionEvent::ModelUpdated(Arc::new(model)));
        }
        self.emit(SessionEvent::ParameterApplied {
            name: update.parameter_name,
            value: update.new_value,
        });
    }

}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
        if let Some(task) = self.refresher.lock().take() {
            task.abort();
        }
        if let Some(in_flight) = self.in_flight.lock().take() {
            in_flight.timer.abort();
        }
    }
}

async fn dispatch_loop(
    coordinator: Weak<SessionCoordinator>,
    mut inbound: broadcast::Receiver<ConnectionEvent>,
) {
    loop {
        let received = inbound.recv().await;
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        match received {
            Ok(event) => coordinator.handle_connection_event(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => coordinator.handle_lag(skipped),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn refresh_loop(coordinator: Weak<SessionCoordinator>, refresh: Arc<Notify>) {
    loop {
        refresh.notified().await;
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        if let Err(e) = coordinator.refresh_views().await {
            tracing::warn!("View refresh failed: {}", e);
        }
    }
}

async fn response_timer(coordinator: Weak<SessionCoordinator>, id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(coordinator) = coordinator.upgrade() else {
        return;
    };
    if coordinator.finish_request(Some(id)) {
        tracing::warn!("No response within {:?}", timeout);
        coordinator.emit(SessionEvent::RequestTimedOut);
    }
}
