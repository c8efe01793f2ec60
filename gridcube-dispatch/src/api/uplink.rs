use axum::{Json, extract::State, http::StatusCode, response::Response};
use base64::{Engine, engine::general_purpose::STANDARD};
use gridcube_core::WirelessDeviceId;

use super::error::ApiError;
use super::models::{ReadingResponse, UplinkRequest};
use super::success_response;
use crate::state::AppState;
use crate::storage::Storage;
use crate::transport::Transport;
use crate::uplink::UplinkError;

// Ingest one frame posted by the wireless gateway
pub async fn receive_uplink<S, T>(
    State(state): State<AppState<S, T>>,
    Json(body): Json<UplinkRequest>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let wireless_id = WirelessDeviceId::parse(body.wireless_device_id.trim())?;
    let payload = STANDARD
        .decode(body.payload_data.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid base64 payload: {e}")))?;

    let processed = match state.uplink.process(wireless_id, &payload).await {
        Ok(processed) => processed,
        Err(UplinkError::Decode(e)) => return Err(ApiError::BadRequest(e.to_string())),
        Err(UplinkError::Storage(e)) => return Err(ApiError::InternalServerError(e)),
    };

    Ok(success_response(
        StatusCode::OK,
        ReadingResponse::new(&processed.device, processed.reading),
        None,
    ))
}
