//! Core trait definitions

mod backend;
mod transport;

pub use backend::Backend;
pub use transport::{Dialer, FrameSink, FrameStream, Link};
