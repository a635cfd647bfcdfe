//! Duplex channel abstraction
//!
//! A [`Dialer`] opens one physical channel for a session and hands back both
//! halves as text-frame sink and stream. The connection manager owns the
//! halves for the lifetime of the channel and never shares them.

use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

use crate::error::ConnectionError;
use cm_protocol::SessionId;

/// Outbound half of an open channel
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;

/// Inbound half of an open channel, ending when the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ConnectionError>> + Send>>;

/// An open channel
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens duplex channels addressed by session id
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a new channel bound to `session_id`
    async fn dial(&self, session_id: &SessionId) -> Result<Link, ConnectionError>;
}
