//! HTTP endpoints over a running bridge.
//!
//! `GET /grill-status?device=<friendly name>` and
//! `GET /grill-history?device=<friendly name>&duration=<seconds>`.
//! Errors are `{"error": ...}` JSON bodies.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use pitwatch_core::{Bridge, CoreError, Device, TelemetrySample};

/// Minimum spacing between re-enumerations triggered by lookup misses.
const RESCAN_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    /// `None` when no account is configured.
    bridge: Option<Bridge>,
    /// When a lookup miss last re-enumerated successfully.
    last_rescan: Arc<Mutex<Option<Instant>>>,
}

impl AppState {
    pub fn new(bridge: Option<Bridge>) -> Self {
        Self {
            bridge,
            last_rescan: Arc::new(Mutex::new(None)),
        }
    }

    fn bridge(&self) -> Result<&Bridge, ApiError> {
        self.bridge.as_ref().ok_or(ApiError::NotConfigured)
    }

    /// Re-enumerate devices after a lookup miss, at most once per
    /// [`RESCAN_INTERVAL`]. Failures are surfaced and never throttled.
    async fn rescan(&self, bridge: &Bridge) -> Result<(), ApiError> {
        let mut last = self.last_rescan.lock().await;
        if last.is_some_and(|at| at.elapsed() < RESCAN_INTERVAL) {
            debug!("device re-enumeration throttled");
            return Ok(());
        }
        if let Err(e) = bridge.refresh_devices().await {
            warn!(error = %e, "device re-enumeration failed");
            return Err(ApiError::Failed("failed to enumerate grills"));
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/grill-status", get(grill_status))
        .route("/grill-history", get(grill_history))
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug)]
enum ApiError {
    NotConfigured,
    MissingDevice,
    NotFound {
        requested: String,
        available: Vec<String>,
    },
    Failed(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "grill bridge not configured" }),
            ),
            ApiError::MissingDevice => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "device parameter required" }),
            ),
            ApiError::NotFound {
                requested,
                available,
            } => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": format!("Grill '{requested}' not found"),
                    "requested": requested,
                    "available": available,
                }),
            ),
            ApiError::Failed(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}

// ── Query parameters ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(alias = "grill_name")]
    device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(alias = "grill_name")]
    device: Option<String>,
    /// Seconds; anything unparseable means the default window.
    duration: Option<String>,
}

#[derive(Serialize)]
struct HistoryBody {
    history: Vec<TelemetrySample>,
}

fn required(device: Option<String>) -> Result<String, ApiError> {
    device
        .filter(|d| !d.is_empty())
        .ok_or(ApiError::MissingDevice)
}

fn not_found(err: CoreError) -> ApiError {
    match err {
        CoreError::DeviceNotFound {
            identifier,
            available,
        } => ApiError::NotFound {
            requested: identifier,
            available,
        },
        _ => ApiError::Failed("device lookup failed"),
    }
}

/// Friendly name → device. A miss re-enumerates (throttled), in case the
/// grill was added after startup.
async fn resolve(state: &AppState, bridge: &Bridge, name: &str) -> Result<Device, ApiError> {
    if let Ok(device) = bridge.device_by_name(name) {
        return Ok(device);
    }
    state.rescan(bridge).await?;
    bridge.device_by_name(name).map_err(|e| {
        warn!(requested = name, available = ?bridge.registry().friendly_names(), "grill not found");
        not_found(e)
    })
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn grill_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Response, ApiError> {
    let bridge = state.bridge()?;
    let name = required(query.device)?;
    let device = resolve(&state, bridge, &name).await?;

    match bridge.status(&device.thing_id).await {
        Ok(status) => Ok(Json(status).into_response()),
        Err(e) if e.is_not_found() => Err(not_found(e)),
        Err(e) => {
            warn!(device = %name, error = %e, "failed to get grill status");
            Err(ApiError::Failed("failed to get grill status"))
        }
    }
}

async fn grill_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let bridge = state.bridge()?;
    let name = required(query.device)?;
    let device = resolve(&state, bridge, &name).await?;

    let window = query
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    debug!(device = %name, window_secs = ?window.map(|w| w.as_secs()), "history request");

    match bridge.history(&device.thing_id, window).await {
        Ok(history) => Ok(Json(HistoryBody { history }).into_response()),
        Err(e) => {
            warn!(device = %name, error = %e, "failed to get history");
            Err(ApiError::Failed("failed to get history"))
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
