//! Reconnecting duplex channel for one session
//!
//! The manager runs a driver task per `connect` call. The driver dials, pumps
//! frames while the channel is open, and on an unclean close schedules the
//! next dial through [`ExponentialBackoff`]. Lifecycle changes are published
//! as [`ConnectionEvent`]s on a broadcast channel and as a
//! [`ConnectionState`] on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cm_core::config::BackoffConfig;
use cm_core::error::ConnectionError;
use cm_core::traits::{Dialer, Link};
use cm_core::ConnectionState;
use cm_protocol::{decode_inbound, encode_outbound, InboundMessage, OutboundMessage, SessionId};

use super::backoff::ExponentialBackoff;

/// Capacity of the lifecycle event channel.
///
/// Subscribers that fall further behind than this lose the oldest events and
/// observe a `Lagged` error on their next receive.
const CONNECTION_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events of the duplex channel
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A physical channel was opened
    Opened { session_id: SessionId },
    /// A decoded inbound message, in arrival order
    Message(InboundMessage),
    /// The channel closed; `clean` means the caller asked for it
    Closed { clean: bool },
    /// A dial or transport failure
    Error { message: String },
    /// A reconnect is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnection stopped after `attempts` tries
    GaveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    Clean,
    Dropped,
}

struct Shared {
    dialer: Arc<dyn Dialer>,
    backoff: BackoffConfig,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    /// Present only while a channel is open
    outbound: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    session: parking_lot::Mutex<Option<SessionId>>,
}

struct ActiveChannel {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one reconnecting duplex channel at a time
pub struct ConnectionManager {
    shared: Arc<Shared>,
    active: tokio::sync::Mutex<Option<ActiveChannel>>,
}

impl ConnectionManager {
    /// Create a manager that opens channels through `dialer`
    pub fn new(dialer: Arc<dyn Dialer>, backoff: BackoffConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(CONNECTION_EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                dialer,
                backoff,
                state,
                events,
                outbound: parking_lot::Mutex::new(None),
                session: parking_lot::Mutex::new(None),
            }),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Open a channel bound to `session_id`
    ///
    /// Any channel opened by an earlier call is closed cleanly first. Returns
    /// once the driver is running; progress is reported through events.
    pub async fn connect(&self, session_id: SessionId) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            tracing::debug!("Closing previous channel before reconnecting");
            previous.shutdown().await;
        }

        *self.shared.session.lock() = Some(session_id.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(self.shared.clone(), session_id, cancel.clone()));
        *active = Some(ActiveChannel { cancel, task });
    }

    /// Close the channel and stop reconnecting
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        if let Some(channel) = active.take() {
            channel.shutdown().await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Encode and transmit a message
    ///
    /// Fails with [`ConnectionError::NotConnected`] unless the channel is
    /// open. Nothing is buffered for later delivery.
    ///
    /// `Ok` means the frame was handed to the channel's writer, not that it
    /// was written. Frames still queued when the channel drops are lost
    /// without an error; the drop itself is reported as
    /// [`ConnectionEvent::Closed`].
    pub fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError> {
        if !self.state().is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let frame = encode_outbound(message)?;

        let outbound = self.shared.outbound.lock();
        let tx = outbound.as_ref().ok_or(ConnectionError::NotConnected)?;
        tx.send(frame).map_err(|_| ConnectionError::NotConnected)?;

        tracing::debug!(message_type = %message.message_type(), "Sent message");
        Ok(())
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Session the current or last channel is bound to
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.session.lock().clone()
    }

    /// Wait for the channel to reach `Connected`
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), ConnectionError> {
        let mut state = self.watch_state();
        let connected = tokio::time::timeout(timeout, async {
            state
                .wait_for(|s| s.is_connected())
                .await
                .map(|_| ())
                .map_err(|_| ConnectionError::Closed)
        })
        .await;

        match connected {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Dial(format!(
                "not connected after {:?}",
                timeout
            ))),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.try_lock() {
            if let Some(channel) = active.take() {
                channel.cancel.cancel();
            }
        }
    }
}

impl ActiveChannel {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Channel driver ended abnormally: {}", e);
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn deliver(&self, frame: &str) {
        match decode_inbound(frame) {
            Ok(message) => {
                tracing::trace!(message_type = %message.message_type(), "Received message");
                self.emit(ConnectionEvent::Message(message));
            }
            Err(e) if e.is_unknown_tag() => {
                tracing::debug!("Dropping message: {}", e);
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable message: {}", e);
            }
        }
    }

    /// Move frames until the channel closes or `cancel` fires
    async fn pump(&self, session_id: &SessionId, link: Link, cancel: &CancellationToken) -> CloseKind {
        let Link {
            mut sink,
            mut stream,
        } = link;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        *self.outbound.lock() = Some(tx);
        self.set_state(ConnectionState::Connected);
        tracing::info!(session_id = %session_id.short(), "Channel open");
        self.emit(ConnectionEvent::Opened {
            session_id: session_id.clone(),
        });

        let kind = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if let Err(e) = sink.close().await {
                        tracing::debug!("Error closing channel: {}", e);
                    }
                    break CloseKind::Clean;
                }

                Some(frame) = rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::warn!("Send failed: {}", e);
                        self.emit(ConnectionEvent::Error { message: e.to_string() });
                        break CloseKind::Dropped;
                    }
                }

                inbound = stream.next() => match inbound {
                    Some(Ok(frame)) => self.deliver(&frame),
                    Some(Err(e)) => {
                        tracing::warn!("Channel failed: {}", e);
                        self.emit(ConnectionEvent::Error { message: e.to_string() });
                        break CloseKind::Dropped;
                    }
                    None => {
                        tracing::info!(session_id = %session_id.short(), "Channel closed by peer");
                        break CloseKind::Dropped;
                    }
                },
            }
        };

        self.outbound.lock().take();
        self.emit(ConnectionEvent::Closed {
            clean: kind == CloseKind::Clean,
        });
        kind
    }
}

/// Dial, pump and redial until cancelled or out of attempts
async fn drive(shared: Arc<Shared>, session_id: SessionId, cancel: CancellationToken) {
    let mut backoff = ExponentialBackoff::from_config(&shared.backoff);
    shared.set_state(ConnectionState::Connecting);

    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.dialer.dial(&session_id) => result,
        };

        match dialed {
            Ok(link) => {
                backoff.reset();
                if shared.pump(&session_id, link, &cancel).await == CloseKind::Clean {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id.short(), "Dial failed: {}", e);
                shared.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::error!(
                session_id = %session_id.short(),
                attempts = backoff.attempts(),
                "Giving up on reconnection"
            );
            shared.emit(ConnectionEvent::GaveUp {
                attempts: backoff.attempts(),
            });
            break;
        };

        shared.set_state(ConnectionState::Reconnecting);
        tracing::warn!(
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        shared.emit(ConnectionEvent::Reconnecting {
            attempt: backoff.attempts(),
            delay,
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.outbound.lock().take();
    shared.set_state(ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDialer;
    use serde_json::json;

    fn backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_secs(1),
            max_attempts,
            jitter: 0.0,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (dialer, _peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer, backoff(3));

        let err = manager.send(&OutboundMessage::GetState).unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (dialer, mut peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer, backoff(3));

        manager.connect(SessionId::new("abc123")).await;
        let mut peer = peers.recv().await.unwrap();
        manager
            .wait_until_connected(Duration::from_secs(5))
            .await
            .unwrap();

        manager.send(&OutboundMessage::user("hello")).unwrap();
        let sent = peer.next_sent().await.unwrap();
        assert_eq!(sent, json!({"type": "user_message", "content": "hello"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_frame_lost_to_drop_is_reported_as_close() {
        let (dialer, mut peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer, backoff(1));
        let mut events = manager.subscribe();

        manager.connect(SessionId::new("s1")).await;
        let peer = peers.recv().await.unwrap();
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Opened { .. }));

        // Accepted by the writer, never read by anyone
        manager.send(&OutboundMessage::user("hello")).unwrap();
        drop(peer);

        loop {
            match next_event(&mut events).await {
                ConnectionEvent::Error { .. } => continue,
                event => {
                    assert!(matches!(event, ConnectionEvent::Closed { clean: false }));
                    break;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_disconnect_never_reconnects() {
        let (dialer, mut peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer.clone(), backoff(5));
        let mut events = manager.subscribe();

        manager.connect(SessionId::new("s1")).await;
        let _peer = peers.recv().await.unwrap();
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Opened { .. }));

        manager.disconnect().await;
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Closed { clean: true }
        ));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(dialer.dial_count(), 1);
        assert!(peers.try_recv().is_err());
        assert!(events.try_recv().is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclean_close_reconnects_and_resets_backoff() {
        let (dialer, mut peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer.clone(), backoff(3));
        let mut events = manager.subscribe();

        manager.connect(SessionId::new("s1")).await;
        let peer = peers.recv().await.unwrap();
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Opened { .. }));

        drop(peer);
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Closed { clean: false }
        ));
        match next_event(&mut events).await {
            ConnectionEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_secs(1));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let peer = peers.recv().await.unwrap();
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Opened { .. }));
        assert_eq!(dialer.dial_count(), 2);

        // A successful open starts the schedule over
        drop(peer);
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Closed { clean: false }
        ));
        match next_event(&mut events).await {
            ConnectionEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_secs(1));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_dials_back_off_then_give_up() {
        let (dialer, _peers) = MemoryDialer::new();
        dialer.refuse(true);
        let manager = ConnectionManager::new(dialer.clone(), backoff(3));
        let mut events = manager.subscribe();

        manager.connect(SessionId::new("s1")).await;

        let mut delays = Vec::new();
        let attempts = loop {
            match next_event(&mut events).await {
                ConnectionEvent::Reconnecting { delay, .. } => delays.push(delay),
                ConnectionEvent::GaveUp { attempts } => break attempts,
                ConnectionEvent::Error { .. } => {}
                other => panic!("unexpected event: {:?}", other),
            }
        };

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(attempts, 3);
        assert_eq!(dialer.dial_count(), 4);

        let mut state = manager.watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_frames_do_not_close_channel() {
        let (dialer, mut peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer, backoff(3));
        let mut events = manager.subscribe();

        manager.connect(SessionId::new("s1")).await;
        let peer = peers.recv().await.unwrap();
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Opened { .. }));

        peer.push_raw("{not json");
        peer.push_raw(r#"{"type":"heartbeat","data":{}}"#);
        peer.push_raw(r#"{"type":"model_info","data":{"provider":42}}"#);
        peer.push("error", json!({"message": "still here"}));

        match next_event(&mut events).await {
            ConnectionEvent::Message(InboundMessage::Error(payload)) => {
                assert_eq!(payload.message, "still here");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_inbound_messages_keep_arrival_order() {
        let (dialer, mut peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer, backoff(3));
        let mut events = manager.subscribe();

        manager.connect(SessionId::new("s1")).await;
        let peer = peers.recv().await.unwrap();
        let _ = next_event(&mut events).await;

        for i in 0..5 {
            peer.push("error", json!({ "message": i.to_string() }));
        }
        for i in 0..5 {
            match next_event(&mut events).await {
                ConnectionEvent::Message(InboundMessage::Error(payload)) => {
                    assert_eq!(payload.message, i.to_string());
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_second_connect_replaces_channel() {
        let (dialer, mut peers) = MemoryDialer::new();
        let manager = ConnectionManager::new(dialer.clone(), backoff(3));

        manager.connect(SessionId::new("first")).await;
        let mut first = peers.recv().await.unwrap();
        manager
            .wait_until_connected(Duration::from_secs(5))
            .await
            .unwrap();

        manager.connect(SessionId::new("second")).await;
        let mut second = peers.recv().await.unwrap();
        manager
            .wait_until_connected(Duration::from_secs(5))
            .await
            .unwrap();

        // The first channel was closed by the client
        assert!(first.next_sent().await.is_none());
        assert_eq!(first.session_id().as_str(), "first");

        manager.send(&OutboundMessage::GetState).unwrap();
        assert_eq!(second.next_sent().await.unwrap(), json!({"type": "get_state"}));
        assert_eq!(manager.session_id().unwrap().as_str(), "second");
        assert_eq!(dialer.dial_count(), 2);
    }
}
