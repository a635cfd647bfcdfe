//! Interactive chat session
//!
//! Plain lines are sent as user messages scoped to the current selection.
//! Lines starting with `/` are local commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::output::{print_error, print_info, print_success, print_warning};
use cm_client::viewer::HeadlessRenderer;
use cm_client::{ConnectionManager, HttpBackend, ModelView, SessionCoordinator, SessionEvent, WsDialer};
use cm_core::config::ClientConfig;
use cm_core::error::SessionError;
use cm_core::traits::Backend;
use cm_core::ExportFormat;
use cm_protocol::Vec3;

const HELP: &str = "\
Commands:
  /param NAME VALUE          update a parameter
  /state                     request a session snapshot
  /pick OX OY OZ DX DY DZ    select the face hit by a ray
  /deselect                  clear the selection
  /fit                       show the camera framing
  /export FORMAT PATH        export the model (step, iges, stl)
  /quit                      leave the session";

/// One line of chat input
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Say(String),
    Param { name: String, value: Value },
    State,
    Pick { origin: Vec3, dir: Vec3 },
    Deselect,
    Fit,
    Export { format: ExportFormat, path: PathBuf },
    Help,
    Quit,
    Empty,
}

/// Parse one input line
pub fn parse_line(line: &str) -> Result<ChatCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ChatCommand::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(ChatCommand::Say(line.to_string()));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("param", [name, value @ ..]) if !value.is_empty() => {
            let raw = value.join(" ");
            // Numbers and booleans go out typed, anything else as a string
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            Ok(ChatCommand::Param {
                name: name.to_string(),
                value,
            })
        }
        ("param", _) => Err("usage: /param NAME VALUE".to_string()),
        ("state", []) => Ok(ChatCommand::State),
        ("pick", coords) if coords.len() == 6 => {
            let mut values = [0.0; 6];
            for (slot, raw) in values.iter_mut().zip(coords) {
                *slot = raw
                    .parse::<f64>()
                    .map_err(|_| format!("not a number: {}", raw))?;
            }
            Ok(ChatCommand::Pick {
                origin: [values[0], values[1], values[2]],
                dir: [values[3], values[4], values[5]],
            })
        }
        ("pick", _) => Err("usage: /pick OX OY OZ DX DY DZ".to_string()),
        ("deselect", []) => Ok(ChatCommand::Deselect),
        ("fit", []) => Ok(ChatCommand::Fit),
        ("export", [format, path]) => {
            let format = format.parse::<ExportFormat>().map_err(|e| e.to_string())?;
            Ok(ChatCommand::Export {
                format,
                path: PathBuf::from(path),
            })
        }
        ("export", _) => Err("usage: /export FORMAT PATH".to_string()),
        ("help", _) => Ok(ChatCommand::Help),
        ("quit" | "exit", _) => Ok(ChatCommand::Quit),
        _ => Err(format!("unknown command: /{}", name)),
    }
}

/// Run an interactive session on stdin
pub async fn chat_command(config: &ClientConfig) -> Result<()> {
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(config)?);
    let dialer = Arc::new(WsDialer::new(config.clone()));
    let connection = Arc::new(ConnectionManager::new(dialer, config.reconnect.clone()));

    let coordinator = SessionCoordinator::start(backend, connection, config)
        .await
        .context("Failed to start session")?;
    print_success(&format!("Session {} started", coordinator.session_id().short()));
    if let Some(info) = coordinator.model_info() {
        print_info(&format!("Model: {}", info));
    }
    print_info("Type a request, or /help for commands");

    let mut view = ModelView::new(HeadlessRenderer::new());
    let mut events = coordinator.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => show_event(&mut view, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    print_warning(&format!("{} session events skipped", skipped));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(ChatCommand::Quit) => break,
                    Ok(command) => run_command(&coordinator, &mut view, command).await,
                    Err(message) => print_error(&message),
                }
            }
        }
    }

    coordinator.close().await;
    print_info("Session closed");
    Ok(())
}

async fn run_command(
    coordinator: &Arc<SessionCoordinator>,
    view: &mut ModelView,
    command: ChatCommand,
) {
    let result = async {
        match command {
            ChatCommand::Say(content) => {
                match coordinator.send_user_message(content, view.selection().cloned()) {
                    Err(SessionError::Busy) => {
                        print_warning("Still waiting for the previous response");
                    }
                    other => other?,
                }
            }
            ChatCommand::Param { name, value } => coordinator.update_parameter(name, value)?,
            ChatCommand::State => coordinator.request_state()?,
            ChatCommand::Pick { origin, dir } => match view.pick(origin, dir) {
                Some(selection) => print_info(&format!(
                    "Selected {} at [{:.3}, {:.3}, {:.3}]",
                    selection.element_id,
                    selection.coordinates[0],
                    selection.coordinates[1],
                    selection.coordinates[2]
                )),
                None => print_info("Nothing hit"),
            },
            ChatCommand::Deselect => {
                view.deselect();
                print_info("Selection cleared");
            }
            ChatCommand::Fit => match view.fit_view() {
                Some(f) => print_info(&format!(
                    "Camera at [{:.2}, {:.2}, {:.2}] looking at [{:.2}, {:.2}, {:.2}], distance {:.2}",
                    f.eye[0], f.eye[1], f.eye[2], f.target[0], f.target[1], f.target[2], f.distance
                )),
                None => print_info("Nothing to frame"),
            },
            ChatCommand::Export { format, path } => {
                let bytes = coordinator.export(format).await?;
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                print_success(&format!("Exported {} bytes to {:?}", bytes.len(), path));
            }
            ChatCommand::Help => println!("{}", HELP),
            ChatCommand::Quit | ChatCommand::Empty => {}
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
    }
}

fn show_event(view: &mut ModelView, event: SessionEvent) {
    match event {
        SessionEvent::Connected => print_success("Connected"),
        SessionEvent::Disconnected { clean } => {
            if !clean {
                print_warning("Connection lost");
            }
        }
        SessionEvent::Reconnecting { attempt, delay } => {
            print_warning(&format!("Reconnecting (attempt {}) in {:?}", attempt, delay));
        }
        SessionEvent::ConnectionLost { attempts } => {
            print_error(&format!("Gave up reconnecting after {} attempts", attempts));
        }
        SessionEvent::ProcessingChanged(true) => print_info("Thinking..."),
        SessionEvent::ProcessingChanged(false) => {}
        SessionEvent::Response(response) => println!("\n{}\n", response.content),
        SessionEvent::ModelUpdated(model) => {
            let state = view.update(Some(&model));
            let extent = view
                .bounds()
                .map(|b| {
                    let size = b.size();
                    format!(" {:.2} x {:.2} x {:.2}", size[0], size[1], size[2])
                })
                .unwrap_or_default();
            print_info(&format!("Model {}{}", state, extent));
        }
        SessionEvent::ParameterApplied { name, value } => {
            print_success(&format!("{} = {}", name, value));
        }
        SessionEvent::StateSynced { backend_processing } => {
            if backend_processing {
                print_info("Backend is still processing");
            }
        }
        SessionEvent::ModelInfoChanged(info) => print_info(&format!("Model: {}", info)),
        SessionEvent::Error { message } => print_error(&message),
        SessionEvent::RequestTimedOut => print_warning("No response in time, you can send again"),
        SessionEvent::RequestAbandoned => print_warning("Request abandoned after connection loss"),
        SessionEvent::ViewsRefreshed => tracing::debug!("Views refreshed"),
    }
}
