//! cm-protocol: Wire protocol for CM2 conversational CAD sessions
//!
//! This crate defines the JSON messages exchanged with the generation
//! backend over the per-session duplex channel, the payloads they carry,
//! and the REST collaborator payloads used for one-shot requests.

pub mod codec;
pub mod error;
pub mod message;
pub mod payload;
pub mod rest;
pub mod session;

pub use codec::{decode_inbound, encode_outbound};
pub use error::ProtocolError;
pub use message::{InboundMessage, MessageType, OutboundMessage};
pub use payload::{
    BoundingBox, ElementKind, ErrorPayload, ExecutionResult, ExecutionStatus, GeometrySelection,
    MeshData, ModelInfo, ModelState, ParameterUpdateResult, SessionState, SystemResponse, Vec3,
};
pub use rest::{
    EditRequest, EditResponse, HealthStatus, ReferenceExecution, RegenerationResult,
    SessionStart,
};
pub use session::SessionId;
