//! Patient file model.
//!
//! A patient file is created as a `draft` by an optometrist or practice and is filled in
//! progressively. Every association is optional on the wire; presence of a sub-object is what
//! the lifecycle state machine keys its enable/disable and completed decisions on.

use crate::error::{PortalError, PortalResult};
use crate::session::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// File status
// ============================================================================

/// Lifecycle status of a patient file, as reported by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Draft,
    Submitted,
    InReviewByReader,
    InReviewByDoctor,
    PendingApproval,
    Approved,
    Referred,
    CareDelegatedToOptometrist,
    ReassureAndDischarge,
    RejectedDueToSomethingWrongWithFile,
    RejectedDueToMediaOpacity,
}

impl FileStatus {
    pub const ALL: [FileStatus; 11] = [
        FileStatus::Draft,
        FileStatus::Submitted,
        FileStatus::InReviewByReader,
        FileStatus::InReviewByDoctor,
        FileStatus::PendingApproval,
        FileStatus::Approved,
        FileStatus::Referred,
        FileStatus::CareDelegatedToOptometrist,
        FileStatus::ReassureAndDischarge,
        FileStatus::RejectedDueToSomethingWrongWithFile,
        FileStatus::RejectedDueToMediaOpacity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Draft => "draft",
            FileStatus::Submitted => "submitted",
            FileStatus::InReviewByReader => "in_review_by_reader",
            FileStatus::InReviewByDoctor => "in_review_by_doctor",
            FileStatus::PendingApproval => "pending_approval",
            FileStatus::Approved => "approved",
            FileStatus::Referred => "referred",
            FileStatus::CareDelegatedToOptometrist => "care_delegated_to_optometrist",
            FileStatus::ReassureAndDischarge => "reassure_and_discharge",
            FileStatus::RejectedDueToSomethingWrongWithFile => {
                "rejected_due_to_something_wrong_with_file"
            }
            FileStatus::RejectedDueToMediaOpacity => "rejected_due_to_media_opacity",
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            FileStatus::RejectedDueToSomethingWrongWithFile | FileStatus::RejectedDueToMediaOpacity
        )
    }

    /// Successful diagnosis outcomes. Nothing moves a file out of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Referred
                | FileStatus::CareDelegatedToOptometrist
                | FileStatus::ReassureAndDischarge
        )
    }

    /// Statuses in which a reader or doctor is (or is about to be) working on the file.
    pub fn is_under_review(&self) -> bool {
        matches!(
            self,
            FileStatus::Submitted
                | FileStatus::InReviewByReader
                | FileStatus::InReviewByDoctor
                | FileStatus::PendingApproval
        )
    }

    /// Statuses the backend may move a file to from this one.
    pub fn allowed_transitions(&self) -> &'static [FileStatus] {
        use FileStatus::*;
        match self {
            Draft => &[Submitted],
            Submitted => &[InReviewByReader, InReviewByDoctor],
            InReviewByReader => &[
                PendingApproval,
                InReviewByDoctor,
                Submitted,
                RejectedDueToSomethingWrongWithFile,
                RejectedDueToMediaOpacity,
            ],
            InReviewByDoctor => &[
                Approved,
                Submitted,
                RejectedDueToSomethingWrongWithFile,
                RejectedDueToMediaOpacity,
            ],
            PendingApproval => &[InReviewByDoctor],
            Approved => &[Referred, CareDelegatedToOptometrist, ReassureAndDischarge],
            RejectedDueToSomethingWrongWithFile | RejectedDueToMediaOpacity => &[Submitted],
            Referred | CareDelegatedToOptometrist | ReassureAndDischarge => &[],
        }
    }

    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Validate a move to `next`, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidTransition`] if the move is not in
    /// [`FileStatus::allowed_transitions`].
    pub fn transition(self, next: FileStatus) -> PortalResult<FileStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PortalError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| PortalError::UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// Sub-objects
// ============================================================================

/// Free-form form payload. Field-level validation happens at the form layer.
pub type FormData = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EyeImage {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Outcome recorded on a diagnosis form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisOutcome {
    Referred,
    CareDelegatedToOptometrist,
    ReassureAndDischarge,
}

impl DiagnosisOutcome {
    pub fn file_status(&self) -> FileStatus {
        match self {
            DiagnosisOutcome::Referred => FileStatus::Referred,
            DiagnosisOutcome::CareDelegatedToOptometrist => FileStatus::CareDelegatedToOptometrist,
            DiagnosisOutcome::ReassureAndDischarge => FileStatus::ReassureAndDischarge,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisForm {
    #[serde(default)]
    pub outcome: Option<DiagnosisOutcome>,
    #[serde(default)]
    pub report_url: Option<String>,
    #[serde(default, flatten)]
    pub details: FormData,
}

/// The professional currently holding a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Professional {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientConsent {
    pub signed_at: DateTime<Utc>,
    #[serde(default)]
    pub signed_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub amount_minor: i64,
    pub currency: String,
    pub paid_at: DateTime<Utc>,
}

// ============================================================================
// Patient file
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientFile {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub id_number: Option<String>,
    #[serde(default)]
    pub file_status: FileStatus,
    #[serde(default)]
    pub patient: Option<Patient>,
    #[serde(default)]
    pub referral_form: Option<FormData>,
    #[serde(default)]
    pub left_eye_images: Option<Vec<EyeImage>>,
    #[serde(default)]
    pub right_eye_images: Option<Vec<EyeImage>>,
    #[serde(default)]
    pub communication_form: Option<FormData>,
    #[serde(default)]
    pub diagnosis_form: Option<DiagnosisForm>,
    #[serde(default)]
    pub rejection_reasons: Option<Vec<String>>,
    #[serde(default)]
    pub reviewed_by: Option<Professional>,
    #[serde(default)]
    pub patient_consent: Option<PatientConsent>,
    #[serde(default)]
    pub payment: Option<PaymentRecord>,
    #[serde(default)]
    pub patient_referred: bool,
}

impl PatientFile {
    /// A new, empty draft with a freshly generated id.
    pub fn new_draft(id_number: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            id_number: Some(id_number.into()),
            ..Default::default()
        }
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    pub fn has_referral_form(&self) -> bool {
        self.referral_form.is_some()
    }

    pub fn has_left_eye_images(&self) -> bool {
        self.left_eye_images
            .as_ref()
            .is_some_and(|images| !images.is_empty())
    }

    pub fn has_right_eye_images(&self) -> bool {
        self.right_eye_images
            .as_ref()
            .is_some_and(|images| !images.is_empty())
    }

    pub fn has_communication_form(&self) -> bool {
        self.communication_form.is_some()
    }

    pub fn has_diagnosis_form(&self) -> bool {
        self.diagnosis_form.is_some()
    }

    pub fn has_patient_consent(&self) -> bool {
        self.patient_consent.is_some()
    }

    pub fn has_payment(&self) -> bool {
        self.payment.is_some()
    }

    /// True when everything needed to hand the file to review has been filled in.
    pub fn is_ready_to_submit(&self) -> bool {
        self.has_referral_form()
            && self.has_left_eye_images()
            && self.has_right_eye_images()
            && self.has_communication_form()
    }

    /// True when `reviewed_by` names someone other than `user_id`.
    pub fn is_held_by_other(&self, user_id: &str) -> bool {
        self.reviewed_by
            .as_ref()
            .is_some_and(|reviewer| reviewer.id != user_id)
    }
}

/// Row shown in list views.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientFileSummary {
    pub id: Uuid,
    #[serde(default)]
    pub id_number: Option<String>,
    pub file_status: FileStatus,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
}

impl PatientFileSummary {
    /// Summarise a file for list views. Files without an id are not listable.
    pub fn from_file(file: &PatientFile) -> Option<Self> {
        Some(Self {
            id: file.id?,
            id_number: file.id_number.clone(),
            file_status: file.file_status,
            patient_name: file.patient.as_ref().map(Patient::full_name),
            reviewed_by: file.reviewed_by.as_ref().map(|r| r.id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serialises_snake_case() {
        let s = serde_json::to_string(&FileStatus::RejectedDueToMediaOpacity).unwrap();
        assert_eq!(s, "\"rejected_due_to_media_opacity\"");
        assert_eq!(
            "in_review_by_doctor".parse::<FileStatus>().unwrap(),
            FileStatus::InReviewByDoctor
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "archived".parse::<FileStatus>().expect_err("should reject");
        assert!(matches!(err, PortalError::UnknownStatus(s) if s == "archived"));
    }

    #[test]
    fn rejected_file_loops_back_to_submission() {
        assert!(FileStatus::RejectedDueToMediaOpacity.can_transition_to(FileStatus::Submitted));
        assert!(!FileStatus::RejectedDueToMediaOpacity.can_transition_to(FileStatus::Approved));
    }

    #[test]
    fn terminal_outcomes_have_no_transitions() {
        for status in FileStatus::ALL.into_iter().filter(FileStatus::is_terminal) {
            assert!(status.allowed_transitions().is_empty(), "{status}");
        }
    }

    #[test]
    fn invalid_transition_reports_both_ends() {
        let err = FileStatus::Draft
            .transition(FileStatus::Approved)
            .expect_err("draft cannot be approved");
        assert_eq!(
            err.to_string(),
            "file cannot move from draft to approved"
        );
    }

    #[test]
    fn parses_camel_case_file() {
        let json = r#"{
            "id": "7f4c2e9d-4b0a-4f3a-9a2c-0e9a6b5d1c88",
            "idNumber": "PF-0042",
            "fileStatus": "in_review_by_reader",
            "referralForm": {"reason": "blurred vision"},
            "leftEyeImages": [],
            "reviewedBy": {"id": "reader-1", "role": "reader"},
            "patientReferred": false
        }"#;

        let file: PatientFile = serde_json::from_str(json).expect("parse file");
        assert_eq!(file.id_number.as_deref(), Some("PF-0042"));
        assert!(file.has_referral_form());
        assert!(!file.has_left_eye_images());
        assert!(file.is_held_by_other("doctor-9"));
        assert!(!file.is_held_by_other("reader-1"));
    }

    #[test]
    fn missing_fields_default_to_empty_draft() {
        let file: PatientFile = serde_json::from_str("{}").expect("parse empty file");
        assert!(!file.has_id());
        assert_eq!(file.file_status, FileStatus::Draft);
        assert!(!file.is_ready_to_submit());
    }

    #[test]
    fn diagnosis_form_keeps_extra_fields() {
        let json = r#"{"outcome": "referred", "findings": "drusen"}"#;
        let form: DiagnosisForm = serde_json::from_str(json).expect("parse diagnosis form");
        assert_eq!(form.outcome, Some(DiagnosisOutcome::Referred));
        assert_eq!(form.details.get("findings").and_then(|v| v.as_str()), Some("drusen"));
    }
}
