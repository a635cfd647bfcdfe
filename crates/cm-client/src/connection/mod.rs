//! Duplex channel management

mod backoff;
mod manager;
mod websocket;

pub use backoff::ExponentialBackoff;
pub use manager::{ConnectionEvent, ConnectionManager};
pub use websocket::WsDialer;
