//! HTTP handlers for patient files and the event channel.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::{FileStore, Mutation, StoreResult};
use api_shared::{
    wire::HEARTBEAT, ClientQuery, ConsentReq, CreateFileReq, EmitEventReq, Envelope, HealthRes,
    HealthService, OutcomeReq, PaymentReq, PollQuery, PollRes, RejectReq, StagePayload,
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use referral_core::{ListView, PatientFile, PatientFileSummary, ServerEvent, StageTitle};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

type FileRes = ApiResult<Json<Envelope<PatientFile>>>;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub view: Option<String>,
}

fn parse_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("invalid file id: {id}")))
}

/// Run `mutate` under the write lock, then announce its event.
async fn apply<F>(state: &AppState, mutate: F) -> FileRes
where
    F: FnOnce(&mut FileStore) -> StoreResult<Mutation>,
{
    let mutation = {
        let mut store = state.store.write().await;
        mutate(&mut store)?
    };
    if let Some(event) = mutation.event {
        state.hub.emit(event);
    }
    Ok(Json(match mutation.file {
        Some(file) => Envelope::success(file),
        None => Envelope::empty("patient file discarded"),
    }))
}

// ============================================================================
// Health
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used by monitoring and by the CLI to confirm the server is reachable.
#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health(state.settings.streaming_enabled))
}

// ============================================================================
// Files
// ============================================================================

#[utoipa::path(
    get,
    path = "/files/in-progress",
    responses(
        (status = 200, description = "The caller's in-progress file, or null data"),
        (status = 401, description = "Missing or unknown bearer token")
    )
)]
/// Fetch the caller's single in-progress file.
///
/// For optometrists and practices this is their draft or rejected file; for readers and doctors
/// the file they currently hold in review. `data` is `null` when there is none.
#[axum::debug_handler]
pub async fn in_progress(State(state): State<AppState>, headers: HeaderMap) -> FileRes {
    let who = state.authenticate(&headers)?;
    let store = state.store.read().await;
    Ok(Json(match store.in_progress(&who) {
        Some(file) => Envelope::success(file),
        None => Envelope::empty("no in-progress patient file"),
    }))
}

#[utoipa::path(
    post,
    path = "/files",
    request_body = CreateFileReq,
    responses(
        (status = 200, description = "Draft created"),
        (status = 403, description = "Caller is not an intake role"),
        (status = 409, description = "Caller already owns an in-progress file")
    )
)]
/// Open a new draft patient file.
///
/// # Errors
/// Returns `409 Conflict` if the caller already owns a draft or rejected file.
#[axum::debug_handler]
pub async fn create_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateFileReq>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let file = state.store.write().await.create(&who, req.patient)?;
    tracing::info!(user = %who.id, id_number = ?file.id_number, "draft opened");
    Ok(Json(Envelope::success(file)))
}

#[utoipa::path(
    get,
    path = "/files/{id}",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "File detail"),
        (status = 403, description = "File belongs to another user"),
        (status = 404, description = "Unknown file")
    )
)]
#[axum::debug_handler]
pub async fn get_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    let file = state.store.read().await.get(&who, id)?;
    Ok(Json(Envelope::success(file)))
}

#[utoipa::path(
    get,
    path = "/files",
    params(("view" = Option<String>, Query, description = "patient-files, todays-clinics, pending-files or overview")),
    responses(
        (status = 200, description = "File summaries for the view"),
        (status = 400, description = "Unknown view")
    )
)]
#[axum::debug_handler]
pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Envelope<Vec<PatientFileSummary>>>> {
    let who = state.authenticate(&headers)?;
    let view = match query.view.as_deref() {
        None => ListView::PatientFiles,
        Some(raw) => raw
            .parse::<ListView>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };
    let rows = state.store.read().await.list(&who, view);
    Ok(Json(Envelope::success(rows)))
}

#[utoipa::path(
    put,
    path = "/files/{id}/stages/{stage}",
    request_body = StagePayload,
    params(
        ("id" = String, Path, description = "Patient file id"),
        ("stage" = String, Path, description = "Stage title, e.g. referral-form")
    ),
    responses(
        (status = 200, description = "Stage saved"),
        (status = 400, description = "Payload does not fit the stage"),
        (status = 409, description = "File is not editable by the caller")
    )
)]
/// Save one stage of the intake or review flow.
///
/// Intake stages are written by the owner while the file is a draft (a rejected file only
/// accepts the referral form). `draft-diagnosis-form` is written by the reviewer holding the
/// file and announces `DIAGNOSIS_FORM_ADDED`.
#[axum::debug_handler]
pub async fn submit_stage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, stage)): Path<(String, String)>,
    Json(payload): Json<StagePayload>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    let stage: StageTitle = stage
        .parse()
        .map_err(|e: referral_core::PortalError| ApiError::BadRequest(e.to_string()))?;
    apply(&state, |store| store.submit_stage(&who, id, stage, payload)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/submit",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "File submitted for review"),
        (status = 400, description = "Intake is incomplete"),
        (status = 409, description = "File cannot be submitted from its status")
    )
)]
#[axum::debug_handler]
pub async fn submit_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.submit(&who, id)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/claim",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "File now in review by the caller"),
        (status = 409, description = "File is held by someone else, or the caller already holds a file")
    )
)]
#[axum::debug_handler]
pub async fn claim_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.claim(&who, id)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/send-for-approval",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "File pending doctor approval"),
        (status = 409, description = "File is not held by the caller or has no diagnosis")
    )
)]
#[axum::debug_handler]
pub async fn send_for_approval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.send_for_approval(&who, id)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/approve",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "File approved"),
        (status = 409, description = "File is not held by the caller or has no diagnosis")
    )
)]
#[axum::debug_handler]
pub async fn approve_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.approve(&who, id)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/outcome",
    request_body = OutcomeReq,
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "Outcome recorded"),
        (status = 409, description = "File is not approved or not held by the caller")
    )
)]
#[axum::debug_handler]
pub async fn record_outcome(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<OutcomeReq>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.record_outcome(&who, id, req.outcome)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/reject",
    request_body = RejectReq,
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "File rejected back to its owner"),
        (status = 400, description = "Status is not a rejection status"),
        (status = 409, description = "File is not in review by the caller")
    )
)]
#[axum::debug_handler]
pub async fn reject_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RejectReq>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.reject(&who, id, req.status, req.reasons)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/timeout",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "Review released back to the queue"),
        (status = 409, description = "File is not in review")
    )
)]
#[axum::debug_handler]
pub async fn close_by_timeout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    tracing::info!(user = %who.id, file = %id, "closing stalled review");
    apply(&state, |store| store.close_by_timeout(id)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/cancel",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "Draft discarded, null data"),
        (status = 409, description = "Only drafts can be cancelled")
    )
)]
#[axum::debug_handler]
pub async fn cancel_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.cancel(&who, id)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/consent",
    request_body = ConsentReq,
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "Consent recorded"),
        (status = 409, description = "File is not awaiting referral confirmation")
    )
)]
#[axum::debug_handler]
pub async fn record_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ConsentReq>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.record_consent(&who, id, req.signed_by)).await
}

#[utoipa::path(
    post,
    path = "/files/{id}/payment",
    request_body = PaymentReq,
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "Payment recorded"),
        (status = 409, description = "Consent missing or file not awaiting confirmation")
    )
)]
#[axum::debug_handler]
pub async fn record_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PaymentReq>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| {
        store.record_payment(&who, id, req.amount_minor, req.currency)
    })
    .await
}

#[utoipa::path(
    post,
    path = "/files/{id}/confirm-referral",
    params(("id" = String, Path, description = "Patient file id")),
    responses(
        (status = 200, description = "Referral confirmed"),
        (status = 409, description = "Consent or payment missing")
    )
)]
#[axum::debug_handler]
pub async fn confirm_referral(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FileRes {
    let who = state.authenticate(&headers)?;
    let id = parse_id(&id)?;
    apply(&state, |store| store.confirm_referral(&who, id)).await
}

// ============================================================================
// Event channel
// ============================================================================

/// `GET /events/stream`: server-sent events, one frame per topic.
///
/// The `event:` field carries the topic and `id:` the cursor.
///
/// # Errors
/// Returns `503 Service Unavailable` when streaming is switched off so clients fall back to
/// polling.
pub async fn event_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ClientQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let who = state.authenticate(&headers)?;
    if !state.settings.streaming_enabled {
        return Err(ApiError::Unavailable("event streaming is disabled".into()));
    }
    tracing::info!(user = %who.id, client = query.client.as_str(), "event stream opened");

    let stream = BroadcastStream::new(state.hub.subscribe()).filter_map(|result| async move {
        match result {
            Ok(published) => Some(Ok(Event::default()
                .event(published.event.topic())
                .id(published.cursor.to_string())
                .data(published.event.topic()))),
            Err(e) => {
                tracing::warn!("event stream lagged: {:?}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.settings.keep_alive)
            .text(HEARTBEAT),
    ))
}

#[utoipa::path(
    get,
    path = "/events/poll",
    params(
        ("client" = String, Query, description = "web or tablet"),
        ("cursor" = Option<u64>, Query, description = "Last cursor seen")
    ),
    responses(
        (status = 200, description = "Topics after the cursor", body = PollRes),
        (status = 401, description = "Missing or unknown bearer token")
    )
)]
/// Long-poll fallback for clients that cannot hold a stream open.
#[axum::debug_handler]
pub async fn event_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PollQuery>,
) -> ApiResult<Json<PollRes>> {
    let who = state.authenticate(&headers)?;
    tracing::trace!(user = %who.id, client = query.client.as_str(), cursor = ?query.cursor, "poll");
    let res = state
        .hub
        .wait_since(query.cursor, state.settings.poll_timeout)
        .await;
    Ok(Json(res))
}

#[utoipa::path(
    post,
    path = "/events",
    request_body = EmitEventReq,
    responses(
        (status = 200, description = "Topic emitted, data is its cursor"),
        (status = 400, description = "Unknown topic")
    )
)]
/// Emit a topic by hand. Used for local testing of refresh behaviour.
#[axum::debug_handler]
pub async fn emit_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EmitEventReq>,
) -> ApiResult<Json<Envelope<u64>>> {
    let who = state.authenticate(&headers)?;
    let event: ServerEvent = req
        .topic
        .parse()
        .map_err(|e: referral_core::PortalError| ApiError::BadRequest(e.to_string()))?;
    tracing::info!(user = %who.id, topic = event.topic(), "manual event");
    Ok(Json(Envelope::success(state.hub.emit(event))))
}
