//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::audio::device::DeviceListing;
use crate::audio::manager::DeviceStatus;
use crate::control::ControlStatus;
use crate::engine::SpeakerStatus;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Full intercom status
#[derive(Debug, serde::Serialize)]
pub struct IntercomStatus {
    #[serde(flatten)]
    pub control: ControlStatus,
    pub devices: DeviceStatus,
    pub speakers: Vec<SpeakerStatus>,
    pub uptime_seconds: u64,
}

/// Device listings for the UI
#[derive(Debug, serde::Serialize)]
pub struct DeviceListings {
    pub recommended: DeviceListing,
    pub raw: DeviceListing,
}

/// Body of the indicator toggles
#[derive(Debug, serde::Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

/// Get intercom status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<IntercomStatus>> {
    let status = IntercomStatus {
        control: state.control.status(),
        devices: state.devices.status(),
        speakers: state.engine.speakers(),
        uptime_seconds: state.started.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}

/// Get available sound devices
pub async fn get_devices(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<DeviceListings>>) {
    // Enumeration talks to the sound driver and may block
    let devices = state.devices.clone();
    let result = tokio::task::spawn_blocking(move || {
        Ok::<_, crate::error::AudioError>(DeviceListings {
            recommended: devices.listing()?,
            raw: devices.raw_listing()?,
        })
    })
    .await;

    match result {
        Ok(Ok(listings)) => (StatusCode::OK, Json(ApiResponse::ok(listings))),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Close and reopen both sound devices
pub async fn reset_devices(State(state): State<Arc<AppState>>) -> Json<ApiResponse<()>> {
    tracing::info!("Resetting sound devices");
    state.devices.reset_speaker();
    state.devices.reset_microphone();
    Json(ApiResponse::ok(()))
}

/// Shut the intercom down
pub async fn request_shutdown(State(state): State<Arc<AppState>>) -> Json<ApiResponse<()>> {
    tracing::info!("Web client requested a shutdown");
    state.shutdown.request();
    Json(ApiResponse::ok(()))
}

/// Start or stop sending microphone audio
pub async fn set_transmitting(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToggleRequest>,
) -> Json<ApiResponse<ControlStatus>> {
    state.control.set_transmitting(req.enabled);
    Json(ApiResponse::ok(state.control.status()))
}

/// Start or stop ignoring network audio
pub async fn set_deafened(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToggleRequest>,
) -> Json<ApiResponse<ControlStatus>> {
    state.control.set_deafened(req.enabled);
    Json(ApiResponse::ok(state.control.status()))
}
