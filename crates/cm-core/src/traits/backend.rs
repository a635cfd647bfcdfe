//! One-shot request/response collaborators

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::BackendError;
use crate::types::ExportFormat;
use cm_protocol::{
    EditRequest, EditResponse, HealthStatus, ModelInfo, ReferenceExecution, SessionId,
    SessionStart, SessionState,
};

/// REST side of the generation backend
///
/// Everything here is a pull: results never override state that arrived as a
/// push message on the session channel.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Establish a new session
    async fn start_session(&self) -> Result<SessionStart, BackendError>;

    /// Generation model metadata
    async fn model_info(&self) -> Result<ModelInfo, BackendError>;

    /// Current parameter values of a session
    async fn parameters(&self, session: &SessionId) -> Result<Value, BackendError>;

    /// Operation history of a session
    async fn operations(&self, session: &SessionId) -> Result<Vec<Value>, BackendError>;

    /// Full session snapshot
    async fn session_state(&self, session: &SessionId) -> Result<SessionState, BackendError>;

    /// Export the current model as a CAD artifact
    async fn export(&self, session: &SessionId, format: ExportFormat)
        -> Result<Bytes, BackendError>;

    /// Run a reference procedure out of band
    async fn execute_reference(
        &self,
        case_id: &str,
        procedure: &str,
    ) -> Result<ReferenceExecution, BackendError>;

    /// Run an edit-session operation
    async fn edit(
        &self,
        session: &SessionId,
        request: &EditRequest,
    ) -> Result<EditResponse, BackendError>;

    /// Service health
    async fn health(&self) -> Result<HealthStatus, BackendError>;
}
