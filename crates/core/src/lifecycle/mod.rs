//! Patient file lifecycle state machine.
//!
//! Given a loaded [`PatientFile`], the viewer's role and the viewer's id, this module decides:
//! - which ordered stage sequence applies,
//! - which stage is active,
//! - which stages are enabled, and which count as completed,
//! - how each stage renders (editable, read-only or progress summary).
//!
//! Everything here is a pure function of its inputs. [`StageTracker`] layers the user's
//! explicit navigation on top and is re-applied after every fetch.

mod tracker;

pub use tracker::StageTracker;

use crate::error::PortalError;
use crate::file::{FileStatus, PatientFile};
use crate::session::Role;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Stage identifiers
// ============================================================================

/// Every stage a patient file can show. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageTitle {
    /// Non-interactive chip showing the human-readable file number.
    PatientId,
    ReferralForm,
    LeftEyeImages,
    RightEyeImages,
    CommunicationPreferences,
    SubmitFile,
    DraftDiagnosisForm,
    DiagnosisReport,
    PatientConsent,
    Payment,
}

impl StageTitle {
    pub const ALL: [StageTitle; 10] = [
        StageTitle::PatientId,
        StageTitle::ReferralForm,
        StageTitle::LeftEyeImages,
        StageTitle::RightEyeImages,
        StageTitle::CommunicationPreferences,
        StageTitle::SubmitFile,
        StageTitle::DraftDiagnosisForm,
        StageTitle::DiagnosisReport,
        StageTitle::PatientConsent,
        StageTitle::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageTitle::PatientId => "patient-id",
            StageTitle::ReferralForm => "referral-form",
            StageTitle::LeftEyeImages => "left-eye-images",
            StageTitle::RightEyeImages => "right-eye-images",
            StageTitle::CommunicationPreferences => "communication-preferences",
            StageTitle::SubmitFile => "submit-file",
            StageTitle::DraftDiagnosisForm => "draft-diagnosis-form",
            StageTitle::DiagnosisReport => "diagnosis-report",
            StageTitle::PatientConsent => "patient-consent",
            StageTitle::Payment => "payment",
        }
    }

    /// Breadcrumb label.
    pub fn label(&self) -> &'static str {
        match self {
            StageTitle::PatientId => "Patient ID",
            StageTitle::ReferralForm => "Referral Form",
            StageTitle::LeftEyeImages => "Left Eye Images",
            StageTitle::RightEyeImages => "Right Eye Images",
            StageTitle::CommunicationPreferences => "Communication Preferences",
            StageTitle::SubmitFile => "Submit File",
            StageTitle::DraftDiagnosisForm => "Draft Diagnosis Form",
            StageTitle::DiagnosisReport => "Diagnosis Report",
            StageTitle::PatientConsent => "Patient Consent",
            StageTitle::Payment => "Payment",
        }
    }
}

impl fmt::Display for StageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageTitle {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageTitle::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s.trim())
            .ok_or_else(|| PortalError::UnknownStage(s.to_string()))
    }
}

// ============================================================================
// Stage sequences
// ============================================================================

/// The closed set of stage sequences a file can be walked through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageSequence {
    /// Optometrist/practice building a draft, or correcting a rejected file.
    ActiveIntake,
    /// Reader/doctor working on a file that is in review.
    InProgressReview,
    /// Read-only view once the file has left the viewer's hands.
    CompletedView,
    /// Optometrist/practice collecting consent and payment for a referred patient.
    ReferralConfirmation,
}

impl StageSequence {
    /// Pick the sequence for `role` looking at `file`.
    pub fn select(role: Role, file: &PatientFile) -> Self {
        let status = file.file_status;
        if role.is_intake() {
            if status == FileStatus::Draft || status.is_rejected() {
                StageSequence::ActiveIntake
            } else if status == FileStatus::Referred && !file.patient_referred {
                StageSequence::ReferralConfirmation
            } else {
                StageSequence::CompletedView
            }
        } else if status.is_under_review() {
            StageSequence::InProgressReview
        } else {
            StageSequence::CompletedView
        }
    }

    /// Ordered stages, excluding the patient id chip.
    pub fn stages(&self) -> &'static [StageTitle] {
        use StageTitle::*;
        match self {
            StageSequence::ActiveIntake => &[
                ReferralForm,
                LeftEyeImages,
                RightEyeImages,
                CommunicationPreferences,
                SubmitFile,
            ],
            StageSequence::InProgressReview | StageSequence::CompletedView => &[
                ReferralForm,
                LeftEyeImages,
                RightEyeImages,
                DraftDiagnosisForm,
                DiagnosisReport,
            ],
            StageSequence::ReferralConfirmation => &[DiagnosisReport, PatientConsent, Payment],
        }
    }

    pub fn contains(&self, stage: StageTitle) -> bool {
        self.stages().contains(&stage)
    }

    /// Landing stage when nothing forces a different one.
    pub fn default_stage(&self) -> StageTitle {
        match self {
            StageSequence::ActiveIntake => StageTitle::ReferralForm,
            StageSequence::InProgressReview | StageSequence::CompletedView => {
                StageTitle::DiagnosisReport
            }
            StageSequence::ReferralConfirmation => StageTitle::PatientConsent,
        }
    }

    /// Sequences in which diagnosis report, consent and payment count as satisfied.
    pub fn is_review_context(&self) -> bool {
        matches!(
            self,
            StageSequence::InProgressReview | StageSequence::CompletedView
        )
    }
}

// ============================================================================
// Stage descriptors and views
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDescriptor {
    pub title: StageTitle,
    pub disabled: bool,
    pub text_only: bool,
}

/// Which component variant a stage renders as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageVariant {
    Editable,
    ReadOnly,
    Progress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    #[serde(flatten)]
    pub descriptor: StageDescriptor,
    pub completed: bool,
    pub variant: StageVariant,
}

impl StageState {
    pub fn title(&self) -> StageTitle {
        self.descriptor.title
    }

    /// Whether a user may navigate to this stage.
    pub fn is_selectable(&self) -> bool {
        !self.descriptor.disabled && !self.descriptor.text_only
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedView {
    pub file_id: Uuid,
    pub status: FileStatus,
    pub sequence: StageSequence,
    pub stages: Vec<StageState>,
    pub active: StageTitle,
}

impl StagedView {
    pub fn stage(&self, title: StageTitle) -> Option<&StageState> {
        self.stages.iter().find(|s| s.title() == title)
    }

    pub fn is_selectable(&self, title: StageTitle) -> bool {
        self.stage(title).is_some_and(StageState::is_selectable)
    }

    pub fn active_state(&self) -> Option<&StageState> {
        self.stage(self.active)
    }
}

/// What the view composition layer should show for a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum FileView {
    /// No file (never created, or discarded). Show a call-to-action.
    NoFile,
    Staged(StagedView),
}

impl FileView {
    pub fn active_stage(&self) -> Option<StageTitle> {
        match self {
            FileView::NoFile => None,
            FileView::Staged(view) => Some(view.active),
        }
    }

    pub fn as_staged(&self) -> Option<&StagedView> {
        match self {
            FileView::NoFile => None,
            FileView::Staged(view) => Some(view),
        }
    }
}

// ============================================================================
// Pure operations
// ============================================================================

/// Ordered stage descriptors for `role` looking at `file`.
///
/// Returns an empty list when the file has no id.
pub fn compute_stage_set(role: Role, file: &PatientFile) -> Vec<StageDescriptor> {
    if !file.has_id() {
        return Vec::new();
    }

    let sequence = StageSequence::select(role, file);
    let chip = file.id_number.as_ref().map(|_| StageDescriptor {
        title: StageTitle::PatientId,
        disabled: false,
        text_only: true,
    });

    chip.into_iter()
        .chain(sequence.stages().iter().map(|&title| StageDescriptor {
            title,
            disabled: is_stage_disabled(title, file, sequence),
            text_only: false,
        }))
        .collect()
}

/// Whether `stage` lacks the data it needs in `sequence`.
pub fn is_stage_disabled(stage: StageTitle, file: &PatientFile, sequence: StageSequence) -> bool {
    if sequence == StageSequence::ActiveIntake {
        // The user is filling these in; only submission waits for them.
        return stage == StageTitle::SubmitFile && !file.is_ready_to_submit();
    }

    match stage {
        StageTitle::PatientId => false,
        StageTitle::ReferralForm => !file.has_referral_form(),
        StageTitle::LeftEyeImages => !file.has_left_eye_images(),
        StageTitle::RightEyeImages => !file.has_right_eye_images(),
        StageTitle::CommunicationPreferences => !file.has_communication_form(),
        StageTitle::SubmitFile => false,
        StageTitle::DraftDiagnosisForm => false,
        StageTitle::DiagnosisReport => !file.has_diagnosis_form(),
        StageTitle::PatientConsent => false,
        StageTitle::Payment => !file.has_patient_consent(),
    }
}

/// The stage the priority rules force, if any.
///
/// 1. A rejected file always lands on the referral form, the only thing that can be corrected.
/// 2. A file held by someone else lands on the diagnosis report, so a second reviewer never
///    resumes another reviewer's draft.
pub fn forced_stage(role: Role, file: &PatientFile, current_user: &str) -> Option<StageTitle> {
    if !file.has_id() {
        return None;
    }
    if file.file_status.is_rejected() {
        return Some(StageTitle::ReferralForm);
    }

    let sequence = StageSequence::select(role, file);
    if file.is_held_by_other(current_user) && sequence.contains(StageTitle::DiagnosisReport) {
        return Some(StageTitle::DiagnosisReport);
    }
    None
}

/// Active stage for `current_user` (with `role`) looking at `file`.
///
/// Returns `None` when the file has no id.
pub fn compute_active_stage(
    role: Role,
    file: &PatientFile,
    current_user: &str,
) -> Option<StageTitle> {
    if !file.has_id() {
        return None;
    }
    if let Some(stage) = forced_stage(role, file, current_user) {
        return Some(stage);
    }

    let sequence = StageSequence::select(role, file);
    let default = sequence.default_stage();
    if !is_stage_disabled(default, file, sequence) {
        return Some(default);
    }

    // Default not available yet: first stage the user can actually open.
    sequence
        .stages()
        .iter()
        .copied()
        .find(|&stage| !is_stage_disabled(stage, file, sequence))
        .or(Some(default))
}

/// Breadcrumb checkmark for `stage`.
pub fn is_stage_completed(stage: StageTitle, file: &PatientFile, sequence: StageSequence) -> bool {
    if sequence.is_review_context()
        && matches!(
            stage,
            StageTitle::DiagnosisReport | StageTitle::PatientConsent | StageTitle::Payment
        )
    {
        return true;
    }

    match stage {
        StageTitle::PatientId => false,
        StageTitle::ReferralForm => file.has_referral_form(),
        StageTitle::LeftEyeImages => file.has_left_eye_images(),
        StageTitle::RightEyeImages => file.has_right_eye_images(),
        StageTitle::CommunicationPreferences => file.has_communication_form(),
        StageTitle::SubmitFile => {
            file.file_status != FileStatus::Draft && !file.file_status.is_rejected()
        }
        StageTitle::DraftDiagnosisForm | StageTitle::DiagnosisReport => file.has_diagnosis_form(),
        StageTitle::PatientConsent => file.has_patient_consent(),
        StageTitle::Payment => file.has_payment(),
    }
}

/// Component variant for `stage`.
pub fn render_variant(
    stage: StageTitle,
    role: Role,
    file: &PatientFile,
    current_user: &str,
    sequence: StageSequence,
) -> StageVariant {
    if stage == StageTitle::PatientId {
        return StageVariant::ReadOnly;
    }

    match sequence {
        StageSequence::ActiveIntake => {
            let correcting = file.file_status.is_rejected();
            if correcting && !matches!(stage, StageTitle::ReferralForm | StageTitle::SubmitFile) {
                StageVariant::ReadOnly
            } else {
                StageVariant::Editable
            }
        }
        StageSequence::InProgressReview => match stage {
            StageTitle::DraftDiagnosisForm => {
                let holds_file = file
                    .reviewed_by
                    .as_ref()
                    .is_some_and(|reviewer| reviewer.id == current_user);
                if role.is_reviewer() && holds_file {
                    StageVariant::Editable
                } else {
                    StageVariant::ReadOnly
                }
            }
            StageTitle::DiagnosisReport => StageVariant::ReadOnly,
            _ => StageVariant::Progress,
        },
        StageSequence::CompletedView => match stage {
            StageTitle::DiagnosisReport => StageVariant::ReadOnly,
            _ => StageVariant::Progress,
        },
        StageSequence::ReferralConfirmation => match stage {
            StageTitle::PatientConsent | StageTitle::Payment => StageVariant::Editable,
            _ => StageVariant::ReadOnly,
        },
    }
}

/// Everything the view composition layer needs for one file, in one call.
pub fn compute_file_view(role: Role, file: Option<&PatientFile>, current_user: &str) -> FileView {
    let Some(file) = file else {
        return FileView::NoFile;
    };
    let (Some(file_id), Some(active)) = (file.id, compute_active_stage(role, file, current_user))
    else {
        return FileView::NoFile;
    };

    let sequence = StageSequence::select(role, file);
    let stages = compute_stage_set(role, file)
        .into_iter()
        .map(|descriptor| StageState {
            descriptor,
            completed: is_stage_completed(descriptor.title, file, sequence),
            variant: render_variant(descriptor.title, role, file, current_user, sequence),
        })
        .collect();

    FileView::Staged(StagedView {
        file_id,
        status: file.file_status,
        sequence,
        stages,
        active,
    })
}
