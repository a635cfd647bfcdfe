//! Session establishment and message dispatch

mod coordinator;
mod events;

pub use coordinator::SessionCoordinator;
pub use events::SessionEvent;
