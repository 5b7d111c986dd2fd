//! Intake endpoint handlers

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use ferry_infra::verify_signature;
use ferry_worker::Admission;

use crate::error::IntakeError;
use crate::notification::{parse_payload, Payload};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-ferry-signature";
pub const TIMESTAMP_HEADER: &str = "x-ferry-request-timestamp";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Receive one signed notification
///
/// The raw body is verified before it is parsed.
pub async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, IntakeError> {
    verify_signature(
        &state.secret,
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
        &body,
        state.signature_tolerance,
        Utc::now().timestamp(),
    )?;

    let object = match parse_payload(&body)? {
        Payload::Challenge(challenge) => {
            tracing::info!("Answered URL verification challenge");
            return Ok((StatusCode::OK, Json(json!({ "challenge": challenge }))));
        }
        Payload::Unhandled(kind) => {
            tracing::debug!(event_type = %kind, "Ignoring unhandled event type");
            return Ok((
                StatusCode::OK,
                Json(json!({ "status": "ignored", "reason": format!("unhandled event type {}", kind) })),
            ));
        }
        Payload::Object(object) => object,
    };

    let object_id = object.object_id.clone();
    let response = match state.intake.admit(object).await? {
        Admission::Accepted => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "accepted", "object_id": object_id })),
        ),
        Admission::Duplicate => (
            StatusCode::OK,
            Json(json!({ "status": "duplicate", "object_id": object_id })),
        ),
        Admission::Ignored(reason) => (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "object_id": object_id, "reason": reason })),
        ),
    };
    Ok(response)
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "queue_available": state.intake.available(),
    }))
}
