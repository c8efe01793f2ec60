use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use gridcube_core::{DeviceAddress, EventId, time::to_gps};
use jiff::Timestamp;

use super::error::ApiError;
use super::models::{BulkEventResponse, EventCreateRequest, EventResponse};
use super::success_response;
use crate::dispatch::{BulkOutcome, DispatchError, FailedDispatch};
use crate::state::AppState;
use crate::storage::{EventStore, Storage};
use crate::transport::Transport;

// Send one command to one or more devices
pub async fn create_events<S, T>(
    State(state): State<AppState<S, T>>,
    Json(body): Json<EventCreateRequest>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let mut devices: Vec<String> = body
        .devices
        .iter()
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty())
        .collect();

    if devices.is_empty() {
        return Err(ApiError::BadRequest("No target devices given".to_owned()));
    }

    let event_id = body
        .event_id
        .as_deref()
        .map(|raw| EventId::from_str(raw.trim()))
        .transpose()?;

    if event_id.is_some() && devices.len() > 1 {
        return Err(ApiError::BadRequest(
            "event_id can only be set when targeting a single device".to_owned(),
        ));
    }

    let start_time = body.start_time.unwrap_or_else(Timestamp::now);
    let gps_time =
        to_gps(start_time, state.leap_seconds).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = if devices.len() == 1 {
        let device = devices.remove(0);
        let id = event_id.unwrap_or_else(EventId::generate);

        match state
            .dispatcher
            .dispatch(id, &device, body.command, gps_time)
            .await
        {
            Ok(event) => BulkOutcome {
                successful_events: vec![event],
                failed_events: Vec::new(),
            },
            Err(failure) => match failure.error {
                DispatchError::Validation(e) => return Err(ApiError::BadRequest(e.to_string())),
                e @ DispatchError::DuplicateEvent(_) => {
                    return Err(ApiError::Conflict(e.to_string()));
                }
                DispatchError::Storage(e) => return Err(ApiError::InternalServerError(e)),
                other => BulkOutcome {
                    successful_events: Vec::new(),
                    failed_events: vec![FailedDispatch {
                        device,
                        event: failure.event,
                        reason: other.to_string(),
                    }],
                },
            },
        }
    } else {
        state
            .dispatcher
            .dispatch_bulk(devices, body.command, gps_time)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let sent = outcome.successful_events.len();
    let failed = outcome.failed_events.len();
    let status = if sent > 0 {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok(success_response(
        status,
        BulkEventResponse::from(outcome),
        Some(format!("{sent} sent, {failed} failed")),
    ))
}

pub async fn get_event<S, T>(
    Path(id): Path<String>,
    State(state): State<AppState<S, T>>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let event_id = EventId::from_str(id.trim())?;

    match state.storage.get_event(event_id).await {
        Ok(Some(event)) => Ok(success_response(
            StatusCode::OK,
            EventResponse::from(event),
            None,
        )),
        Ok(None) => Err(ApiError::NotFound("Event not found".to_owned())),
        Err(e) => Err(ApiError::InternalServerError(format!(
            "Failed to get event: {e}"
        ))),
    }
}

// Events keep the label the device resolved to when they were sent, so a
// mapped device also lists what was sent to its wireless id before mapping
pub async fn list_device_events<S, T>(
    Path(id): Path<String>,
    State(state): State<AppState<S, T>>,
) -> Result<Response, ApiError>
where
    S: Storage,
    T: Transport,
{
    let id = id.trim();
    let label = state.resolver.resolve_for_response(id).await;

    let mut labels = vec![label.to_string()];
    if let DeviceAddress::Public(_) = label {
        let target = state.resolver.resolve_for_communication(id).await;
        if let DeviceAddress::Wireless(_) = target {
            labels.push(target.to_string());
        }
    }

    let mut events = Vec::new();
    for label in &labels {
        let listed = state
            .storage
            .list_events(label)
            .await
            .map_err(|e| ApiError::InternalServerError(format!("Failed to list events: {e}")))?;
        events.extend(listed);
    }
    events.sort_by_key(|e| e.created_at);

    let responses: Vec<EventResponse> = events.into_iter().map(EventResponse::from).collect();
    Ok(success_response(StatusCode::OK, responses, None))
}
