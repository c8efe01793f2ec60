use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use gridcube_core::{DeviceAddress, DeviceMapping, PacketType, PublicDeviceId, WirelessDeviceId};
use jiff::Timestamp;

use super::error::ApiError;
use super::models::{DeviceCreateRequest, DeviceResponse, ReadingQueryParams, ReadingResponse};
use super::success_response;
use crate::state::AppState;
use crate::storage::{DeviceRegistry, ReadingQuery, ReadingStore, Storage};
use crate::transport::Transport;

const MAX_READINGS: usize = 1000;

pub async fn list_devices<S, T>(
    State(state): State<AppState<S, T>>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let devices = state
        .storage
        .list_devices()
        .await
        .map_err(|e| ApiError::InternalServerError(format!("Failed to list devices: {e}")))?;

    let responses: Vec<DeviceResponse> = devices.into_iter().map(DeviceResponse::from).collect();
    Ok(success_response(StatusCode::OK, responses, None))
}

// Create or replace the mapping for one device
pub async fn register_device<S, T>(
    State(state): State<AppState<S, T>>,
    Json(body): Json<DeviceCreateRequest>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let public_id = PublicDeviceId::parse(body.public_id.trim())?;
    let wireless_id = WirelessDeviceId::parse(body.wireless_id.trim())?;

    let mapping = DeviceMapping {
        public_id: public_id.clone(),
        wireless_id,
        wireless_arn: body.wireless_arn.map(Into::into),
        thing_arn: body.thing_arn.map(Into::into),
        registered_at: Timestamp::now(),
    };

    state
        .storage
        .register_device(mapping)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("Failed to register device: {e}")))?;

    let device = state
        .storage
        .get_device(&public_id)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("Failed to load device: {e}")))?
        .ok_or_else(|| ApiError::InternalServerError("Registered device vanished".to_owned()))?;

    Ok(success_response(
        StatusCode::CREATED,
        DeviceResponse::from(device),
        Some("Device registered".to_owned()),
    ))
}

// Look a device up by either id form
pub async fn get_device<S, T>(
    Path(id): Path<String>,
    State(state): State<AppState<S, T>>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let public_id = match state.resolver.resolve_for_response(&id).await {
        DeviceAddress::Public(public_id) => public_id,
        DeviceAddress::Wireless(_) => {
            return Err(ApiError::NotFound("Device not found".to_owned()));
        }
        DeviceAddress::Unrecognized(_) => return Err(unrecognized(&id)),
    };

    match state.storage.get_device(&public_id).await {
        Ok(Some(device)) => Ok(success_response(
            StatusCode::OK,
            DeviceResponse::from(device),
            None,
        )),
        Ok(None) => Err(ApiError::NotFound("Device not found".to_owned())),
        Err(e) => Err(ApiError::InternalServerError(format!(
            "Failed to get device: {e}"
        ))),
    }
}

pub async fn list_readings<S, T>(
    Path(id): Path<String>,
    State(state): State<AppState<S, T>>,
    Query(params): Query<ReadingQueryParams>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let device = state.resolver.resolve_for_response(&id).await;
    if let DeviceAddress::Unrecognized(_) = device {
        return Err(unrecognized(&id));
    }

    let packet_type = params
        .packet_type
        .map(PacketType::try_from)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let query = ReadingQuery {
        packet_type,
        limit: params
            .limit
            .unwrap_or(ReadingQuery::default().limit)
            .clamp(1, MAX_READINGS),
    };

    // readings that arrived before the device was mapped are keyed by wireless id
    let mut keys = vec![device.clone()];
    if let DeviceAddress::Public(_) = device {
        let target = state.resolver.resolve_for_communication(&id).await;
        if let DeviceAddress::Wireless(_) = target {
            keys.push(target);
        }
    }

    let mut readings = Vec::new();
    for key in &keys {
        let listed = state
            .storage
            .list_readings(key, query)
            .await
            .map_err(|e| ApiError::InternalServerError(format!("Failed to list readings: {e}")))?;
        readings.extend(listed);
    }
    readings.sort_by(|a, b| (b.received_at, b.id.0).cmp(&(a.received_at, a.id.0)));
    readings.truncate(query.limit);

    let responses: Vec<ReadingResponse> = readings
        .into_iter()
        .map(|reading| ReadingResponse::new(&device, reading))
        .collect();

    Ok(success_response(StatusCode::OK, responses, None))
}

fn unrecognized(id: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Unrecognized device id '{id}'. Expected a 6-digit public id or a UUID."
    ))
}
