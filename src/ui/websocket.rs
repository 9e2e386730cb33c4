//! Live status over WebSocket
//!
//! A client first receives an `init` message with the device lists, then a
//! `status` message with the voice level every half second. Clients can ask
//! for a device reset or a shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::audio::device::DeviceListing;
use crate::control::ControlStatus;
use crate::ui::server::AppState;

const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Messages sent to the browser
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Init { data: DeviceListing },
    Status {
        vad: f32,
        #[serde(flatten)]
        control: ControlStatus,
    },
}

/// Messages received from the browser
#[derive(Debug, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Shutdown,
    Ping,
    Reset,
    Volume {
        #[serde(default)]
        volume: Option<u32>,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let devices = state.devices.clone();
    let listing = tokio::task::spawn_blocking(move || devices.raw_listing())
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or_default();

    if send(&mut socket, &ServerMessage::Init { data: listing }).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = ServerMessage::Status {
                    vad: state.devices.vad_level(),
                    control: state.control.status(),
                };
                if send(&mut socket, &status).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => handle_client_message(&state, &text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            tracing::error!("Failed to encode status message: {}", e);
            Ok(())
        }
    }
}

pub(crate) fn handle_client_message(state: &AppState, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!("Error handling websocket message: {}", e);
            return;
        }
    };

    match message {
        ClientMessage::Shutdown => {
            tracing::info!("Web client requested a shutdown");
            state.shutdown.request();
        }
        ClientMessage::Ping => {}
        ClientMessage::Reset => {
            tracing::info!("Resetting sound devices");
            state.devices.reset_speaker();
            state.devices.reset_microphone();
        }
        ClientMessage::Volume { volume } => {
            tracing::debug!(?volume, "Volume control is not available");
        }
    }
}
