//! The file API seam.
//!
//! Screens talk to the backend only through [`FileApi`], so they can be driven by the REST
//! client in production and by in-memory fakes in tests.

use api_shared::StagePayload;
use async_trait::async_trait;
use referral_core::{
    DiagnosisOutcome, FileStatus, ListView, Patient, PatientFile, PatientFileSummary,
    PortalResult, StageTitle,
};
use uuid::Uuid;

#[async_trait]
pub trait FileApi: Send + Sync {
    /// The caller's single in-progress file. `Ok(None)` when there is none.
    async fn fetch_in_progress(&self) -> PortalResult<Option<PatientFile>>;

    /// One file by id. `Ok(None)` when the backend does not know it.
    async fn fetch_file(&self, id: Uuid) -> PortalResult<Option<PatientFile>>;

    async fn list_files(&self, view: ListView) -> PortalResult<Vec<PatientFileSummary>>;

    async fn create_file(&self, patient: Option<Patient>) -> PortalResult<PatientFile>;

    async fn submit_stage(
        &self,
        id: Uuid,
        stage: StageTitle,
        payload: StagePayload,
    ) -> PortalResult<PatientFile>;

    async fn submit_file(&self, id: Uuid) -> PortalResult<PatientFile>;

    async fn claim_file(&self, id: Uuid) -> PortalResult<PatientFile>;

    async fn send_for_approval(&self, id: Uuid) -> PortalResult<PatientFile>;

    async fn approve_file(&self, id: Uuid) -> PortalResult<PatientFile>;

    async fn record_outcome(&self, id: Uuid, outcome: DiagnosisOutcome)
        -> PortalResult<PatientFile>;

    async fn reject_file(
        &self,
        id: Uuid,
        status: FileStatus,
        reasons: Vec<String>,
    ) -> PortalResult<PatientFile>;

    async fn cancel_file(&self, id: Uuid) -> PortalResult<()>;

    async fn record_consent(&self, id: Uuid, signed_by: Option<String>)
        -> PortalResult<PatientFile>;

    async fn record_payment(
        &self,
        id: Uuid,
        amount_minor: i64,
        currency: String,
    ) -> PortalResult<PatientFile>;

    async fn confirm_referral(&self, id: Uuid) -> PortalResult<PatientFile>;
}
