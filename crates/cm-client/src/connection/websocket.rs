//! WebSocket dialer for the backend's session channel

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use cm_core::config::ClientConfig;
use cm_core::error::ConnectionError;
use cm_core::traits::{Dialer, Link};
use cm_protocol::SessionId;

/// Opens `ws(s)://.../ws/{session_id}` channels
pub struct WsDialer {
    config: ClientConfig,
}

impl WsDialer {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, session_id: &SessionId) -> Result<Link, ConnectionError> {
        let url = self
            .config
            .websocket_url(session_id.as_str())
            .map_err(|e| ConnectionError::Dial(e.to_string()))?;

        tracing::debug!(url = %url, "Dialing session channel");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Dial(e.to_string()))?;
        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|frame: String| future::ready(Ok::<_, ConnectionError>(Message::text(frame))));

        // Only text frames carry messages; control frames are handled by tungstenite
        let stream = read.filter_map(|item| {
            future::ready(match item {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(ConnectionError::Transport(e.to_string()))),
            })
        });

        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}
