//! HTTP request handlers
//!
//! JSON in, JSON out; errors map to the taxonomy's status codes with a
//! `{ "error", "message" }` body, plus `existing_reading_id` on slot
//! conflicts so clients can link to the colliding reading.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use flowline_common::model::{Measurements, ReadingSlot};
use flowline_common::threshold::ReadingEvaluation;
use flowline_common::{Error, FlowReading};

use crate::api::AppContext;
use crate::workflow::state_machine::DraftInput;
use crate::workflow::SubmitRequest;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map a domain error onto its HTTP representation
fn error_response(err: Error) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }
    let mut body = json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    if let Error::Conflict { existing: Some(id) } = &err {
        body["existing_reading_id"] = json!(id);
    }
    (status, Json(body))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    /// Present when editing an existing Draft/Rejected reading
    pub reading_id: Option<Uuid>,
    pub pipeline_id: Uuid,
    pub reading_date: NaiveDate,
    pub slot_id: Uuid,
    #[serde(default)]
    pub measurements: Measurements,
    pub notes: Option<String>,
    pub recorded_by: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    /// Present when submitting an already-stored reading
    pub reading_id: Option<Uuid>,
    // Draft fields for submit-in-one-step; required when reading_id is absent
    pub pipeline_id: Option<Uuid>,
    pub reading_date: Option<NaiveDate>,
    pub slot_id: Option<Uuid>,
    #[serde(default)]
    pub measurements: Measurements,
    pub notes: Option<String>,
    pub recorded_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub reading: FlowReading,
    pub evaluation: ReadingEvaluation,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub validator_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub validator_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: Uuid,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health - status, build identification, live session count
pub async fn health(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "module": "flowline-server",
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("GIT_HASH"),
        "build_timestamp": env!("BUILD_TIMESTAMP"),
        "build_profile": env!("BUILD_PROFILE"),
        "live_sessions": ctx.hub.session_count(),
    }))
}

// ============================================================================
// Reading Workflow
// ============================================================================

/// POST /readings/draft - create or edit a draft
pub async fn save_draft(
    State(ctx): State<AppContext>,
    Json(req): Json<DraftRequest>,
) -> ApiResult<FlowReading> {
    let input = DraftInput {
        pipeline_id: req.pipeline_id,
        reading_date: req.reading_date,
        slot_id: req.slot_id,
        measurements: req.measurements,
        notes: req.notes,
        recorded_by: req.recorded_by,
    };
    ctx.service
        .save_draft(req.reading_id, input)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /readings/submit - submit a stored reading or draft fields
pub async fn submit(
    State(ctx): State<AppContext>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<SubmitResponse> {
    let request = match body.reading_id {
        Some(reading_id) => SubmitRequest::Existing { reading_id },
        None => {
            let missing = |field: &str| {
                error_response(Error::Validation(format!(
                    "{} is required when reading_id is absent",
                    field
                )))
            };
            SubmitRequest::Draft(DraftInput {
                pipeline_id: body.pipeline_id.ok_or_else(|| missing("pipeline_id"))?,
                reading_date: body.reading_date.ok_or_else(|| missing("reading_date"))?,
                slot_id: body.slot_id.ok_or_else(|| missing("slot_id"))?,
                measurements: body.measurements,
                notes: body.notes,
                recorded_by: body.recorded_by.ok_or_else(|| missing("recorded_by"))?,
            })
        }
    };

    ctx.service
        .submit(request)
        .await
        .map(|outcome| {
            Json(SubmitResponse {
                reading: outcome.reading,
                evaluation: outcome.evaluation,
            })
        })
        .map_err(error_response)
}

/// GET /readings/pending - the validators' review queue
pub async fn list_pending(State(ctx): State<AppContext>) -> ApiResult<Vec<FlowReading>> {
    ctx.service
        .list_pending()
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /readings/:id
pub async fn get_reading(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<FlowReading> {
    ctx.service.get(id).await.map(Json).map_err(error_response)
}

/// POST /readings/:id/validate
pub async fn validate(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<FlowReading> {
    ctx.service
        .validate(id, req.validator_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /readings/:id/reject
pub async fn reject(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<FlowReading> {
    ctx.service
        .reject(id, req.validator_id, &req.reason)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Reference Data
// ============================================================================

/// GET /slots - the seeded reading-slot reference data
pub async fn list_slots(State(ctx): State<AppContext>) -> ApiResult<Vec<ReadingSlot>> {
    let rows: Vec<(Uuid, String, chrono::NaiveTime, chrono::NaiveTime)> = sqlx::query_as(
        "SELECT id, label, starts_at, ends_at FROM reading_slots ORDER BY starts_at",
    )
    .fetch_all(&ctx.pool)
    .await
    .map_err(|e| error_response(e.into()))?;

    Ok(Json(
        rows.into_iter()
            .map(|(id, label, starts_at, ends_at)| ReadingSlot {
                id,
                label,
                starts_at,
                ends_at,
            })
            .collect(),
    ))
}

// ============================================================================
// Notifications
// ============================================================================

/// POST /notifications/sessions/:id/heartbeat
pub async fn heartbeat(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Value> {
    if ctx.hub.touch(session_id) {
        Ok(Json(json!({ "status": "ok" })))
    } else {
        Err(error_response(Error::NotFound(format!(
            "session {session_id}"
        ))))
    }
}

/// GET /notifications/unread?user_id= - durable-store baseline
pub async fn unread(
    State(ctx): State<AppContext>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Value> {
    let events = ctx
        .notifications
        .list_unread(query.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({
        "count": events.len(),
        "events": events,
    })))
}

/// POST /notifications/:event_id/read - mark read and refresh badges
pub async fn mark_read(
    State(ctx): State<AppContext>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<Value> {
    let known = ctx
        .notifications
        .mark_read(req.user_id, event_id)
        .await
        .map_err(error_response)?;
    if !known {
        return Err(error_response(Error::NotFound(format!(
            "notification {event_id}"
        ))));
    }

    let count = ctx
        .notifications
        .count_unread(req.user_id)
        .await
        .map_err(error_response)?;
    ctx.hub.push_unread(req.user_id, count);

    Ok(Json(json!({ "status": "ok", "unread_count": count })))
}
