//! Events published by the session coordinator

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use cm_protocol::{ModelInfo, ModelState, SystemResponse};

/// Something the user-facing layer may want to show
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session channel opened
    Connected,
    /// The session channel closed
    Disconnected { clean: bool },
    /// A reconnect is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnection gave up; the session is terminally disconnected
    ConnectionLost { attempts: u32 },

    /// The outstanding-request flag changed
    ProcessingChanged(bool),
    /// Reply to a user message
    Response(Arc<SystemResponse>),
    /// A new model state replaces the current one
    ModelUpdated(Arc<ModelState>),
    /// A parameter change was executed successfully
    ParameterApplied { name: String, value: Value },
    /// A full session snapshot arrived
    StateSynced { backend_processing: bool },
    /// Generation model metadata changed
    ModelInfoChanged(ModelInfo),
    /// A domain error to surface as-is
    Error { message: String },

    /// The outstanding request saw no reply within the response timeout
    RequestTimedOut,
    /// The channel dropped, or replies may have been lost, while a request
    /// was outstanding
    RequestAbandoned,

    /// Parameters and operation history were pulled again
    ViewsRefreshed,
}
