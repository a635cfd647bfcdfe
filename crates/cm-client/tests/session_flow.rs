//! End-to-end flows: coordinator events driving a model view

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use cm_client::testing::{cube_model_state, meshless_model_state, FakeBackend, MemoryDialer, MemoryPeer};
use cm_client::viewer::{HeadlessRenderer, ShapeKind};
use cm_client::{ConnectionManager, ModelView, SessionCoordinator, SessionEvent, ViewState};
use cm_core::config::ClientConfig;
use cm_core::error::SessionError;

struct App {
    coordinator: Arc<SessionCoordinator>,
    backend: Arc<FakeBackend>,
    renderer: Arc<HeadlessRenderer>,
    view: ModelView,
    events: broadcast::Receiver<SessionEvent>,
    peer: MemoryPeer,
    _peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl App {
    async fn start() -> Self {
        let config = ClientConfig::default();
        let backend = Arc::new(FakeBackend::new());
        let (dialer, mut peers) = MemoryDialer::new();
        let connection = Arc::new(ConnectionManager::new(dialer, config.reconnect.clone()));

        let coordinator = SessionCoordinator::start(backend.clone(), connection, &config)
            .await
            .unwrap();
        let events = coordinator.subscribe();
        let peer = peers.recv().await.unwrap();
        coordinator
            .connection()
            .wait_until_connected(Duration::from_secs(5))
            .await
            .unwrap();

        let renderer = HeadlessRenderer::new();
        let view = ModelView::new(renderer.clone());

        Self {
            coordinator,
            backend,
            renderer,
            view,
            events,
            peer,
            _peers: peers,
        }
    }

    /// Feed model updates to the view until an event matches
    async fn pump_until<F>(&mut self, mut done: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("session event channel closed");
            if let SessionEvent::ModelUpdated(model) = &event {
                self.view.update(Some(model));
            }
            if done(&event) {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn test_session_start_pulls_model_info() {
    let app = App::start().await;

    assert_eq!(app.coordinator.session_id().as_str(), "abc123");
    assert_eq!(app.backend.calls(), ["start_session", "model_info"]);
    assert_eq!(app.coordinator.model_info().unwrap().model_name, "llama3");
}

#[tokio::test]
async fn test_mesh_replaces_placeholder() {
    let mut app = App::start().await;

    app.peer.push(
        "session_state",
        json!({"session_id": "abc123", "model_state": meshless_model_state(), "is_processing": false}),
    );
    app.pump_until(|e| matches!(e, SessionEvent::StateSynced { .. }))
        .await;
    assert_eq!(app.view.state(), ViewState::Placeholder);
    assert_eq!(app.renderer.live_of(ShapeKind::Placeholder), 1);

    app.coordinator
        .send_user_message("make it a cube", None)
        .unwrap();
    app.peer.next_sent().await.unwrap();
    app.peer.push(
        "system_response",
        json!({"content": "Here is your cube", "model_state": cube_model_state()}),
    );
    app.pump_until(|e| matches!(e, SessionEvent::Response(_)))
        .await;

    assert_eq!(app.view.state(), ViewState::Rendered);
    assert_eq!(app.renderer.live_of(ShapeKind::Placeholder), 0);
    assert_eq!(app.renderer.live_of(ShapeKind::Mesh), 1);
    assert!(!app.coordinator.is_processing());
}

#[tokio::test]
async fn test_failed_parameter_update_keeps_model() {
    let mut app = App::start().await;

    app.peer.push("session_state", json!({"model_state": cube_model_state()}));
    app.pump_until(|e| matches!(e, SessionEvent::StateSynced { .. }))
        .await;
    app.pump_until(|e| matches!(e, SessionEvent::ViewsRefreshed))
        .await;
    assert_eq!(app.view.state(), ViewState::Rendered);
    let uploads = app.renderer.upload_count();

    app.coordinator
        .update_parameter("width", json!(-5))
        .unwrap();
    let sent = app.peer.next_sent().await.unwrap();
    assert_eq!(sent["type"], "parameter_update");
    assert_eq!(sent["parameter_name"], "width");

    app.peer.push(
        "parameter_updated",
        json!({
            "parameter_name": "width",
            "new_value": -5,
            "execution_result": {
                "plan_id": "p-1",
                "status": "error",
                "execution_time": 0.2,
                "error_message": "width must be positive"
            }
        }),
    );
    let event = app
        .pump_until(|e| matches!(e, SessionEvent::Error { .. }))
        .await;
    match event {
        SessionEvent::Error { message } => assert_eq!(message, "width must be positive"),
        other => panic!("unexpected event: {:?}", other),
    }
    app.pump_until(|e| matches!(e, SessionEvent::ViewsRefreshed))
        .await;

    assert_eq!(app.view.state(), ViewState::Rendered);
    assert_eq!(app.renderer.upload_count(), uploads);
    assert_eq!(app.backend.call_count("parameters:abc123"), 2);
}

#[tokio::test]
async fn test_second_message_rejected_while_processing() {
    let mut app = App::start().await;

    app.coordinator.send_user_message("first", None).unwrap();
    let second = app.coordinator.send_user_message("second", None);
    assert!(matches!(second, Err(SessionError::Busy)));

    let sent = app.peer.next_sent().await.unwrap();
    assert_eq!(sent["content"], "first");
    assert!(app.peer.try_next_sent().is_none());
}

#[tokio::test]
async fn test_picked_face_travels_with_next_message() {
    let mut app = App::start().await;

    app.peer.push("session_state", json!({"model_state": cube_model_state()}));
    app.pump_until(|e| matches!(e, SessionEvent::StateSynced { .. }))
        .await;

    let selection = app
        .view
        .pick([0.1, 0.2, 5.0], [0.0, 0.0, -1.0])
        .cloned()
        .unwrap();
    assert_eq!(app.view.state(), ViewState::Selected);

    app.coordinator
        .send_user_message("add a hole here", Some(selection))
        .unwrap();
    let sent = app.peer.next_sent().await.unwrap();
    let geometry = &sent["selected_geometry"];
    assert_eq!(geometry["element_type"], "face");
    assert!((geometry["coordinates"][2].as_f64().unwrap() - 0.5).abs() < 1e-9);
    assert!((geometry["normal"][2].as_f64().unwrap() - 1.0).abs() < 1e-9);
}
