//! # API REST
//!
//! Reference REST API and event channel for the referral portal.
//!
//! Handles:
//! - HTTP endpoints with axum over an in-memory file store
//! - the event channel (server-sent events with a long-poll fallback)
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialisation, CORS, bearer authentication)
//!
//! Uses `api-shared` for the envelope and wire types, so `referral-client` speaks to it without
//! any translation.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod events;
pub mod handlers;
pub mod state;
pub mod store;

pub use error::{ApiError, ApiResult};
pub use events::{EventHub, Published};
pub use state::{demo_users, AppState, ServerSettings};
pub use store::{FileStore, Mutation, StoreError};

use api_shared::wire::{EMIT_PATH, POLL_PATH, STREAM_PATH};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::in_progress,
        handlers::create_file,
        handlers::get_file,
        handlers::list_files,
        handlers::submit_stage,
        handlers::submit_file,
        handlers::claim_file,
        handlers::send_for_approval,
        handlers::approve_file,
        handlers::record_outcome,
        handlers::reject_file,
        handlers::close_by_timeout,
        handlers::cancel_file,
        handlers::record_consent,
        handlers::record_payment,
        handlers::confirm_referral,
        handlers::event_poll,
        handlers::emit_event,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::ApiStatus,
        api_shared::CreateFileReq,
        api_shared::StagePayload,
        api_shared::RejectReq,
        api_shared::OutcomeReq,
        api_shared::ConsentReq,
        api_shared::PaymentReq,
        api_shared::EmitEventReq,
        api_shared::PollRes,
    ))
)]
pub struct ApiDoc;

/// Build the full application router.
///
/// # Arguments
/// * `state` - Shared store, event hub and user table.
///
/// # Returns
/// A router serving the file endpoints, the event channel and Swagger UI.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/files", get(handlers::list_files).post(handlers::create_file))
        .route("/files/in-progress", get(handlers::in_progress))
        .route("/files/:id", get(handlers::get_file))
        .route("/files/:id/stages/:stage", put(handlers::submit_stage))
        .route("/files/:id/submit", post(handlers::submit_file))
        .route("/files/:id/claim", post(handlers::claim_file))
        .route("/files/:id/send-for-approval", post(handlers::send_for_approval))
        .route("/files/:id/approve", post(handlers::approve_file))
        .route("/files/:id/outcome", post(handlers::record_outcome))
        .route("/files/:id/reject", post(handlers::reject_file))
        .route("/files/:id/timeout", post(handlers::close_by_timeout))
        .route("/files/:id/cancel", post(handlers::cancel_file))
        .route("/files/:id/consent", post(handlers::record_consent))
        .route("/files/:id/payment", post(handlers::record_payment))
        .route("/files/:id/confirm-referral", post(handlers::confirm_referral))
        .route(STREAM_PATH, get(handlers::event_stream))
        .route(POLL_PATH, get(handlers::event_poll))
        .route(EMIT_PATH, post(handlers::emit_event))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_shared::{auth::bearer_header, Envelope};
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use referral_core::{FileStatus, PatientFile};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(demo_users(), ServerSettings::default()))
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, bearer_header(token));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(&app(), request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn unauthenticated_calls_are_rejected() {
        let app = app();
        let (status, body) = send(&app, request("GET", "/files/in-progress", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");

        let (status, _) = send(
            &app,
            request("GET", "/files/in-progress", Some("stolen"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn no_in_progress_file_is_null_data() {
        let (status, body) = send(
            &app(),
            request("GET", "/files/in-progress", Some("optometrist-1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn second_draft_conflicts() {
        let app = app();
        let (status, body) = send(
            &app,
            request("POST", "/files", Some("optometrist-1"), Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let file: PatientFile = serde_json::from_value(body["data"].clone()).unwrap();
        assert_eq!(file.file_status, FileStatus::Draft);

        let (status, body) = send(
            &app,
            request("POST", "/files", Some("optometrist-1"), Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let env: Envelope<Value> = serde_json::from_value(body).unwrap();
        assert!(!env.is_success());
    }

    #[tokio::test]
    async fn stage_payload_for_unknown_stage_is_bad_request() {
        let app = app();
        let (_, body) = send(
            &app,
            request("POST", "/files", Some("practice-1"), Some(json!({}))),
        )
        .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            request(
                "PUT",
                &format!("/files/{id}/stages/x-ray"),
                Some("practice-1"),
                Some(json!({"data": {}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request(
                "PUT",
                &format!("/files/{id}/stages/referral-form"),
                Some("practice-1"),
                Some(json!({"data": {"reason": "flashes"}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["referralForm"]["reason"], "flashes");
    }

    #[tokio::test]
    async fn emitted_topics_are_pollable() {
        let app = app();
        let (_, first) = send(
            &app,
            request("GET", "/events/poll?client=web", Some("reader-1"), None),
        )
        .await;
        assert_eq!(first["cursor"], 0);

        let (status, _) = send(
            &app,
            request(
                "POST",
                "/events",
                Some("reader-1"),
                Some(json!({"topic": "FILE_REFERRED"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, polled) = send(
            &app,
            request("GET", "/events/poll?client=web&cursor=0", Some("reader-1"), None),
        )
        .await;
        assert_eq!(polled["cursor"], 1);
        assert_eq!(polled["events"], json!(["FILE_REFERRED"]));
    }

    #[tokio::test]
    async fn unknown_topic_cannot_be_emitted() {
        let (status, _) = send(
            &app(),
            request(
                "POST",
                "/events",
                Some("reader-1"),
                Some(json!({"topic": "FILE_TELEPORTED"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disabled_streaming_answers_unavailable() {
        let settings = ServerSettings {
            streaming_enabled: false,
            ..ServerSettings::default()
        };
        let app = router(AppState::new(demo_users(), settings));
        let (status, _) = send(
            &app,
            request("GET", "/events/stream?client=tablet", Some("tablet-1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
