//! HTTP error mapping.
//!
//! Every failure leaves the server as an error envelope with a matching status code so the
//! client can tell a conflict from an expired session without parsing messages.

use crate::store::StoreError;
use api_shared::{auth::AuthError, Envelope};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// The display text is the envelope `message`, shown to users as-is.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorised(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorised(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound(StoreError::NotFound.to_string()),
            StoreError::Forbidden(m) => ApiError::Forbidden(m),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            StoreError::BadRequest(m) => ApiError::BadRequest(m),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorised(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(%status, "{message}");
        } else {
            tracing::debug!(%status, "{message}");
        }
        (status, Json(Envelope::<()>::error(message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn store_errors_keep_their_message_and_status() {
        let missing = ApiError::from(StoreError::NotFound);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "patient file not found");

        let held = ApiError::from(StoreError::Conflict("file is held by reader-1".into()));
        assert_eq!(held.status(), StatusCode::CONFLICT);
        assert_eq!(held.to_string(), "file is held by reader-1");
    }

    #[tokio::test]
    async fn response_carries_error_envelope() {
        let res = ApiError::Unavailable("event streaming is disabled".into()).into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let env: Envelope<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert!(!env.is_success());
        assert_eq!(env.message, "event streaming is disabled");
    }
}
