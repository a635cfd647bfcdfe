//! Text frame codec for channel messages
//!
//! Every inbound frame is a JSON envelope `{"type": ..., "data": ...}`. The
//! envelope is parsed first so that a bad payload can be reported against its
//! tag, and tags this client does not consume are rejected as unknown rather
//! than malformed.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::{InboundMessage, MessageType, OutboundMessage};

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: Value,
}

/// Decode one inbound text frame
pub fn decode_inbound(frame: &str) -> Result<InboundMessage, ProtocolError> {
    let envelope: RawEnvelope = serde_json::from_str(frame).map_err(ProtocolError::Malformed)?;

    let ty = MessageType::from_tag(&envelope.tag)
        .filter(|ty| ty.is_inbound())
        .ok_or_else(|| ProtocolError::UnknownMessageType(envelope.tag.clone()))?;

    let message = match ty {
        MessageType::SystemResponse => {
            InboundMessage::SystemResponse(payload(&envelope.tag, envelope.data)?)
        }
        MessageType::ModelInfo => InboundMessage::ModelInfo(payload(&envelope.tag, envelope.data)?),
        MessageType::ParameterUpdate => {
            InboundMessage::ParameterUpdate(payload(&envelope.tag, envelope.data)?)
        }
        MessageType::SessionState => {
            InboundMessage::SessionState(payload(&envelope.tag, envelope.data)?)
        }
        MessageType::Error => InboundMessage::Error(payload(&envelope.tag, envelope.data)?),
        MessageType::UserMessage | MessageType::GetState => {
            return Err(ProtocolError::UnknownMessageType(envelope.tag));
        }
    };

    Ok(message)
}

/// Encode one outbound message as a text frame
pub fn encode_outbound(message: &OutboundMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

fn payload<T: DeserializeOwned>(tag: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        tag: tag.to_string(),
        source,
    })
}
