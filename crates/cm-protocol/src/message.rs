//! Channel message types
//!
//! Outbound messages are flat JSON objects tagged by `type`. Inbound messages
//! wrap their payload as `{"type": ..., "data": ...}` and are decoded by
//! [`crate::codec::decode_inbound`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::{
    ErrorPayload, GeometrySelection, ModelInfo, ParameterUpdateResult, SessionState,
    SystemResponse,
};

/// Message type tags recognized on the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Natural-language request from the user (outbound)
    UserMessage,
    /// Parameter change (outbound) or its execution result (inbound)
    ParameterUpdate,
    /// Request a full session snapshot (outbound)
    GetState,
    /// Reply to a user message
    SystemResponse,
    /// Generation model metadata
    ModelInfo,
    /// Full session snapshot
    SessionState,
    /// Domain error
    Error,
}

impl MessageType {
    /// Wire tag for this message type
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::UserMessage => "user_message",
            MessageType::ParameterUpdate => "parameter_update",
            MessageType::GetState => "get_state",
            MessageType::SystemResponse => "system_response",
            MessageType::ModelInfo => "model_info",
            MessageType::SessionState => "session_state",
            MessageType::Error => "error",
        }
    }

    /// Parse a wire tag
    ///
    /// The backend answers parameter changes with `parameter_updated`, which
    /// is accepted as an alias of `parameter_update`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "user_message" => Some(MessageType::UserMessage),
            "parameter_update" | "parameter_updated" => Some(MessageType::ParameterUpdate),
            "get_state" => Some(MessageType::GetState),
            "system_response" => Some(MessageType::SystemResponse),
            "model_info" => Some(MessageType::ModelInfo),
            "session_state" => Some(MessageType::SessionState),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }

    /// Whether the client expects to receive this type
    pub fn is_inbound(self) -> bool {
        !matches!(self, MessageType::UserMessage | MessageType::GetState)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Natural-language prompt, optionally scoped to a picked element
    UserMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_geometry: Option<GeometrySelection>,
    },

    /// Change one model parameter
    ParameterUpdate {
        parameter_name: String,
        new_value: Value,
    },

    /// Ask the backend to push a `session_state` snapshot
    GetState,
}

impl OutboundMessage {
    /// Create a user message without a selection
    pub fn user(content: impl Into<String>) -> Self {
        OutboundMessage::UserMessage {
            content: content.into(),
            selected_geometry: None,
        }
    }

    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            OutboundMessage::UserMessage { .. } => MessageType::UserMessage,
            OutboundMessage::ParameterUpdate { .. } => MessageType::ParameterUpdate,
            OutboundMessage::GetState => MessageType::GetState,
        }
    }
}

/// Messages received from the backend
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SystemResponse(SystemResponse),
    ModelInfo(ModelInfo),
    ParameterUpdate(ParameterUpdateResult),
    SessionState(SessionState),
    Error(ErrorPayload),
}

impl InboundMessage {
    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            InboundMessage::SystemResponse(_) => MessageType::SystemResponse,
            InboundMessage::ModelInfo(_) => MessageType::ModelInfo,
            InboundMessage::ParameterUpdate(_) => MessageType::ParameterUpdate,
            InboundMessage::SessionState(_) => MessageType::SessionState,
            InboundMessage::Error(_) => MessageType::Error,
        }
    }

    /// Whether this message ends an outstanding user request
    pub fn terminates_request(&self) -> bool {
        matches!(
            self,
            InboundMessage::SystemResponse(_) | InboundMessage::Error(_)
        )
    }
}
