//! In-memory collaborators for driving the client without a network
//!
//! [`MemoryDialer`] hands out channel pairs whose far end is a [`MemoryPeer`]
//! the test controls. [`FakeBackend`] answers REST calls from canned values
//! and records which calls were made.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use cm_core::error::{BackendError, ConnectionError};
use cm_core::traits::{Backend, Dialer, Link};
use cm_core::ExportFormat;
use cm_protocol::{
    BoundingBox, EditRequest, EditResponse, HealthStatus, MeshData, ModelInfo, ModelState,
    ReferenceExecution, SessionId, SessionStart, SessionState,
};

use crate::viewer::Mesh;

/// Dialer whose channels end in a [`MemoryPeer`]
pub struct MemoryDialer {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    dials: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryDialer {
    /// Create a dialer and the queue its accepted peers arrive on
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accepted, peers) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            accepted,
            dials: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        });
        (dialer, peers)
    }

    /// Make subsequent dials fail
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Dial attempts so far, failed ones included
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, session_id: &SessionId) -> Result<Link, ConnectionError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Dial("connection refused".to_string()));
        }

        let (to_peer, from_client) = fmpsc::unbounded::<String>();
        let (to_client, from_peer) = fmpsc::unbounded::<String>();

        let peer = MemoryPeer {
            session_id: session_id.clone(),
            to_client,
            from_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| ConnectionError::Dial("no listener".to_string()))?;

        let sink = to_peer.sink_map_err(|_| ConnectionError::Closed);
        let stream = from_peer.map(Ok::<String, ConnectionError>);
        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Far end of an in-memory channel; dropping it closes the channel uncleanly
pub struct MemoryPeer {
    session_id: SessionId,
    to_client: fmpsc::UnboundedSender<String>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Session the channel was dialed for
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Push a `{type, data}` envelope to the client
    pub fn push(&self, tag: &str, data: Value) {
        self.push_raw(&json!({ "type": tag, "data": data }).to_string());
    }

    /// Push an arbitrary text frame to the client
    pub fn push_raw(&self, frame: &str) {
        let _ = self.to_client.unbounded_send(frame.to_string());
    }

    /// Next frame sent by the client, `None` once the client closed
    pub async fn next_sent(&mut self) -> Option<Value> {
        let frame = self.from_client.next().await?;
        serde_json::from_str(&frame).ok()
    }

    /// A frame the client already sent, without waiting
    pub fn try_next_sent(&mut self) -> Option<Value> {
        let frame = self.from_client.next().now_or_never()??;
        serde_json::from_str(&frame).ok()
    }
}

/// REST backend answering from canned values
pub struct FakeBackend {
    session_id: Mutex<Option<String>>,
    embedded_model_info: Mutex<Option<ModelInfo>>,
    model_info: Mutex<ModelInfo>,
    reference: Mutex<ReferenceExecution>,
    reference_delay: Mutex<Duration>,
    parameters_delay: Mutex<Duration>,
    edit_response: Mutex<Option<EditResponse>>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Backend that hands out session `abc123` without model metadata
    pub fn new() -> Self {
        Self {
            session_id: Mutex::new(Some("abc123".to_string())),
            embedded_model_info: Mutex::new(None),
            model_info: Mutex::new(sample_model_info()),
            reference: Mutex::new(ReferenceExecution {
                success: true,
                mesh_data: Some(cube_mesh_data()),
                bounding_box: Some(BoundingBox::centered_cube(1.0)),
                error: None,
            }),
            reference_delay: Mutex::new(Duration::ZERO),
            parameters_delay: Mutex::new(Duration::ZERO),
            edit_response: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make session establishment fail
    pub fn failing_start(self) -> Self {
        *self.session_id.lock() = None;
        self
    }

    /// Embed model metadata in the session establishment response
    pub fn with_embedded_model_info(self, info: ModelInfo) -> Self {
        *self.embedded_model_info.lock() = Some(info);
        self
    }

    pub fn set_reference(&self, reference: ReferenceExecution) {
        *self.reference.lock() = reference;
    }

    /// Delay before `execute_reference` answers
    pub fn set_reference_delay(&self, delay: Duration) {
        *self.reference_delay.lock() = delay;
    }

    /// Delay before `parameters` answers
    pub fn set_parameters_delay(&self, delay: Duration) {
        *self.parameters_delay.lock() = delay;
    }

    pub fn set_edit_response(&self, response: EditResponse) {
        *self.edit_response.lock() = Some(response);
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls whose name starts with `name`
    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(name)).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn start_session(&self) -> Result<SessionStart, BackendError> {
        self.record("start_session");
        let session_id = self.session_id.lock().clone();
        match session_id {
            Some(session_id) => Ok(SessionStart {
                session_id,
                status: Some("success".to_string()),
                model_info: self.embedded_model_info.lock().clone(),
            }),
            None => Err(BackendError::Status {
                status: 500,
                message: "orchestrator unavailable".to_string(),
            }),
        }
    }

    async fn model_info(&self) -> Result<ModelInfo, BackendError> {
        self.record("model_info");
        Ok(self.model_info.lock().clone())
    }

    async fn parameters(&self, session: &SessionId) -> Result<Value, BackendError> {
        self.record(format!("parameters:{}", session));
        let delay = *self.parameters_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({"width": 10.0, "height": 5.0}))
    }

    async fn operations(&self, session: &SessionId) -> Result<Vec<Value>, BackendError> {
        self.record(format!("operations:{}", session));
        Ok(vec![json!({"type": "box"})])
    }

    async fn session_state(&self, session: &SessionId) -> Result<SessionState, BackendError> {
        self.record(format!("session_state:{}", session));
        Ok(SessionState {
            session_id: Some(session.to_string()),
            ..Default::default()
        })
    }

    async fn export(
        &self,
        session: &SessionId,
        format: ExportFormat,
    ) -> Result<Bytes, BackendError> {
        self.record(format!("export:{}:{}", session, format));
        Ok(Bytes::from_static(b"ISO-10303-21;"))
    }

    async fn execute_reference(
        &self,
        case_id: &str,
        _procedure: &str,
    ) -> Result<ReferenceExecution, BackendError> {
        self.record(format!("execute_reference:{}", case_id));
        let delay = *self.reference_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.reference.lock().clone())
    }

    async fn edit(
        &self,
        session: &SessionId,
        request: &EditRequest,
    ) -> Result<EditResponse, BackendError> {
        self.record(format!("edit:{}:{}", session, request.action()));
        let response = self.edit_response.lock().clone();
        response.ok_or_else(|| BackendError::Domain("no edit response configured".to_string()))
    }

    async fn health(&self) -> Result<HealthStatus, BackendError> {
        self.record("health");
        Ok(HealthStatus {
            status: "healthy".to_string(),
            service: "CM2 Conversational CAD".to_string(),
        })
    }
}

/// Model metadata used by the fakes
pub fn sample_model_info() -> ModelInfo {
    ModelInfo {
        provider: "ollama".to_string(),
        model_name: "llama3".to_string(),
        is_local: true,
        base_url: Some("http://localhost:11434".to_string()),
    }
}

/// Binary STL of a unit cube centered on the origin
pub fn cube_stl() -> Vec<u8> {
    Mesh::cuboid(&BoundingBox::centered_cube(1.0)).to_binary_stl()
}

/// Base64 mesh payload of a unit cube
pub fn cube_mesh_data() -> MeshData {
    MeshData {
        format: "stl".to_string(),
        data_base64: base64::engine::general_purpose::STANDARD.encode(cube_stl()),
    }
}

/// Renderable model state of a unit cube
pub fn cube_model_state() -> ModelState {
    ModelState {
        kind: Some("solid".to_string()),
        mesh_data: Some(cube_mesh_data()),
        bounding_box: Some(BoundingBox::centered_cube(1.0)),
        ..Default::default()
    }
}

/// Model state with parameters but no mesh
pub fn meshless_model_state() -> ModelState {
    let mut state = ModelState::default();
    state.parameters.insert("width".to_string(), json!(10.0));
    state
}
