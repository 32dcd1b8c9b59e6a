//! REST implementation of [`FileApi`].

use crate::api::FileApi;
use api_shared::{
    auth::bearer_header, ConsentReq, CreateFileReq, EmitEventReq, Envelope, HealthRes,
    OutcomeReq, PaymentReq, RejectReq, StagePayload,
};
use async_trait::async_trait;
use referral_core::{
    CoreConfig, DiagnosisOutcome, FileStatus, ListView, Patient, PatientFile,
    PatientFileSummary, PortalError, PortalResult, ServerEvent, Session, StageTitle,
};
use reqwest::{header::AUTHORIZATION, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Authenticated REST client for one session.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    /// Client for `session` against the configured REST base URL.
    pub fn for_session(config: &CoreConfig, session: &Session) -> Self {
        Self::new(config.api_base_url(), session.refresh_token.clone())
    }

    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> PortalResult<HealthRes> {
        let res = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(network)?;
        let status = res.status();
        if !status.is_success() {
            return Err(PortalError::Api {
                status: status.as_u16(),
                message: "health check failed".into(),
            });
        }
        let bytes = res.bytes().await.map_err(network)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Emit a topic on the event channel by hand. Returns the cursor it was given.
    pub async fn emit_event(&self, event: ServerEvent) -> PortalResult<u64> {
        let body = EmitEventReq {
            topic: event.topic().to_string(),
        };
        self.call(Method::POST, "/events", Some(&body))
            .await?
            .ok_or_else(|| missing_data("/events"))
    }

    async fn call<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> PortalResult<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut req = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .header(AUTHORIZATION, bearer_header(&self.token));
        if let Some(body) = body {
            req = req.json(body);
        }

        tracing::debug!(%method, path, "api request");
        let res = req.send().await.map_err(network)?;
        decode(res).await
    }

    async fn file_call<B>(&self, method: Method, path: &str, body: Option<&B>) -> PortalResult<PatientFile>
    where
        B: Serialize + ?Sized,
    {
        self.call(method, path, body)
            .await?
            .ok_or_else(|| missing_data(path))
    }

    async fn post_file(&self, path: &str) -> PortalResult<PatientFile> {
        self.file_call::<()>(Method::POST, path, None).await
    }
}

/// Unwrap the `{status, message, data}` envelope.
///
/// 401 becomes `Unauthorised` and 409 becomes `Conflict` so callers can react without parsing
/// messages.
async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> PortalResult<Option<T>> {
    let status = res.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(PortalError::Unauthorised);
    }

    let bytes = res.bytes().await.map_err(network)?;
    let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => return Err(e.into()),
        Err(_) => {
            return Err(PortalError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            })
        }
    };

    if status == StatusCode::CONFLICT {
        return Err(PortalError::Conflict(envelope.message));
    }
    if !status.is_success() {
        return Err(PortalError::Api {
            status: status.as_u16(),
            message: envelope.message,
        });
    }
    envelope.into_result().map_err(|message| PortalError::Api {
        status: status.as_u16(),
        message,
    })
}

fn network(err: reqwest::Error) -> PortalError {
    PortalError::Network(err.to_string())
}

fn missing_data(path: &str) -> PortalError {
    PortalError::InvalidInput(format!("{path} returned no data"))
}

#[async_trait]
impl FileApi for RestClient {
    async fn fetch_in_progress(&self) -> PortalResult<Option<PatientFile>> {
        self.call::<PatientFile, ()>(Method::GET, "/files/in-progress", None)
            .await
    }

    async fn fetch_file(&self, id: Uuid) -> PortalResult<Option<PatientFile>> {
        match self
            .call::<PatientFile, ()>(Method::GET, &format!("/files/{id}"), None)
            .await
        {
            Err(PortalError::Api { status: 404, .. }) => Ok(None),
            other => other,
        }
    }

    async fn list_files(&self, view: ListView) -> PortalResult<Vec<PatientFileSummary>> {
        let rows = self
            .call::<Vec<PatientFileSummary>, ()>(
                Method::GET,
                &format!("/files?view={}", view.as_str()),
                None,
            )
            .await?;
        Ok(rows.unwrap_or_default())
    }

    async fn create_file(&self, patient: Option<Patient>) -> PortalResult<PatientFile> {
        self.file_call(Method::POST, "/files", Some(&CreateFileReq { patient }))
            .await
    }

    async fn submit_stage(
        &self,
        id: Uuid,
        stage: StageTitle,
        payload: StagePayload,
    ) -> PortalResult<PatientFile> {
        self.file_call(
            Method::PUT,
            &format!("/files/{id}/stages/{}", stage.as_str()),
            Some(&payload),
        )
        .await
    }

    async fn submit_file(&self, id: Uuid) -> PortalResult<PatientFile> {
        self.post_file(&format!("/files/{id}/submit")).await
    }

    async fn claim_file(&self, id: Uuid) -> PortalResult<PatientFile> {
        self.post_file(&format!("/files/{id}/claim")).await
    }

    async fn send_for_approval(&self, id: Uuid) -> PortalResult<PatientFile> {
        self.post_file(&format!("/files/{id}/send-for-approval"))
            .await
    }

    async fn approve_file(&self, id: Uuid) -> PortalResult<PatientFile> {
        self.post_file(&format!("/files/{id}/approve")).await
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        outcome: DiagnosisOutcome,
    ) -> PortalResult<PatientFile> {
        self.file_call(
            Method::POST,
            &format!("/files/{id}/outcome"),
            Some(&OutcomeReq { outcome }),
        )
        .await
    }

    async fn reject_file(
        &self,
        id: Uuid,
        status: FileStatus,
        reasons: Vec<String>,
    ) -> PortalResult<PatientFile> {
        self.file_call(
            Method::POST,
            &format!("/files/{id}/reject"),
            Some(&RejectReq { status, reasons }),
        )
        .await
    }

    async fn cancel_file(&self, id: Uuid) -> PortalResult<()> {
        self.call::<PatientFile, ()>(Method::POST, &format!("/files/{id}/cancel"), None)
            .await
            .map(|_| ())
    }

    async fn record_consent(
        &self,
        id: Uuid,
        signed_by: Option<String>,
    ) -> PortalResult<PatientFile> {
        self.file_call(
            Method::POST,
            &format!("/files/{id}/consent"),
            Some(&ConsentReq { signed_by }),
        )
        .await
    }

    async fn record_payment(
        &self,
        id: Uuid,
        amount_minor: i64,
        currency: String,
    ) -> PortalResult<PatientFile> {
        self.file_call(
            Method::POST,
            &format!("/files/{id}/payment"),
            Some(&PaymentReq {
                amount_minor,
                currency,
            }),
        )
        .await
    }

    async fn confirm_referral(&self, id: Uuid) -> PortalResult<PatientFile> {
        self.post_file(&format!("/files/{id}/confirm-referral"))
            .await
    }
}
