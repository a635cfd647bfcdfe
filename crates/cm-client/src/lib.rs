//! cm-client: Real-time session synchronization for the CM2 CAD client
//!
//! The crate is built around four components that share one reconnecting
//! duplex channel:
//!
//! - [`ConnectionManager`] owns the channel, frames outbound messages and
//!   decodes inbound ones, reconnecting with exponential backoff
//! - [`SessionCoordinator`] establishes a session and dispatches inbound
//!   messages, enforcing one outstanding user request at a time
//! - [`ModelView`] turns model states into rendered meshes, placeholders and
//!   selections
//! - [`TestOrchestrator`] races benchmark prompts against per-case timeouts
//!
//! The components are plain values passed by reference; none of them is a
//! global.

pub mod bench;
pub mod connection;
pub mod http;
pub mod session;
pub mod testing;
pub mod viewer;

pub use bench::{CaseStatus, TestOrchestrator, TestSuite};
pub use connection::{ConnectionEvent, ConnectionManager, WsDialer};
pub use http::HttpBackend;
pub use session::{SessionCoordinator, SessionEvent};
pub use viewer::{ModelView, ViewState};
