pub mod devices;
pub mod error;
pub mod events;
pub mod models;
pub mod uplink;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::state::AppState;
use crate::storage::Storage;
use crate::transport::Transport;

use models::{ApiResponse, HealthResponse};

pub fn router<S, T>() -> Router<AppState<S, T>>
where
    S: Storage,
    T: Transport,
{
    Router::new()
        .route("/uplink", post(uplink::receive_uplink::<S, T>))
        // Device routes
        .route(
            "/devices",
            get(devices::list_devices::<S, T>).post(devices::register_device::<S, T>),
        )
        .route("/devices/{id}", get(devices::get_device::<S, T>))
        .route("/devices/{id}/readings", get(devices::list_readings::<S, T>))
        .route("/devices/{id}/events", get(events::list_device_events::<S, T>))
        // Event routes
        .route("/events", post(events::create_events::<S, T>))
        .route("/events/{id}", get(events::get_event::<S, T>))
}

pub async fn health<S, T>(State(state): State<AppState<S, T>>) -> Response
where
    S: Storage,
    T: Transport,
{
    success_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok".to_owned(),
            uptime_secs: state.uptime_secs(),
        },
        None,
    )
}

pub(crate) fn success_response<T: serde::Serialize>(
    status: StatusCode,
    data: T,
    message: Option<String>,
) -> Response {
    let api_response = ApiResponse {
        success: true,
        data: Some(data),
        message,
    };
    (status, Json(api_response)).into_response()
}
