//! In-memory patient file store.
//!
//! The store is the source of truth for conflicting edits. Single ownership is an explicit part
//! of its contract:
//! - an optometrist/practice owns at most one in-progress file (draft or rejected),
//! - a reader/doctor holds at most one file in review,
//! - a file in review is held by exactly one professional; a second claim is a conflict.
//!
//! Every mutation returns the event it announces so the caller can emit it after the write
//! lock is released.

use api_shared::StagePayload;
use chrono::Utc;
use referral_core::{
    DiagnosisForm, DiagnosisOutcome, EyeImage, FileStatus, Identity, ListView, Patient,
    PatientConsent, PatientFile, PatientFileSummary, PaymentRecord, PortalError, Professional,
    Role, ServerEvent, StageTitle,
};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("patient file not found")]
    NotFound,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
}

impl From<PortalError> for StoreError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::InvalidTransition { .. } | PortalError::Conflict(_) => {
                StoreError::Conflict(err.to_string())
            }
            other => StoreError::BadRequest(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a write: the file after the change (absent when it was discarded) and the event
/// to announce.
#[derive(Debug)]
pub struct Mutation {
    pub file: Option<PatientFile>,
    pub event: Option<ServerEvent>,
}

impl Mutation {
    fn quiet(file: PatientFile) -> Self {
        Self {
            file: Some(file),
            event: None,
        }
    }

    fn announce(file: PatientFile, event: ServerEvent) -> Self {
        Self {
            file: Some(file),
            event: Some(event),
        }
    }
}

#[derive(Clone, Debug)]
struct StoredFile {
    owner_id: String,
    owner_role: Role,
    file: PatientFile,
}

impl StoredFile {
    fn id(&self) -> Option<Uuid> {
        self.file.id
    }

    fn is_owned_by(&self, who: &Identity) -> bool {
        self.owner_id == who.id
    }

    fn is_held_by(&self, who: &Identity) -> bool {
        self.file
            .reviewed_by
            .as_ref()
            .is_some_and(|reviewer| reviewer.id == who.id)
    }

    fn is_in_progress_for_owner(&self) -> bool {
        let status = self.file.file_status;
        status == FileStatus::Draft || status.is_rejected()
    }

    fn is_in_active_review(&self) -> bool {
        matches!(
            self.file.file_status,
            FileStatus::InReviewByReader | FileStatus::InReviewByDoctor
        )
    }
}

#[derive(Debug, Default)]
pub struct FileStore {
    files: HashMap<Uuid, StoredFile>,
    next_number: u64,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// The single in-progress file for `who`, if any.
    pub fn in_progress(&self, who: &Identity) -> Option<PatientFile> {
        self.files
            .values()
            .find(|stored| {
                if who.role.is_intake() {
                    stored.is_owned_by(who) && stored.is_in_progress_for_owner()
                } else {
                    stored.is_held_by(who) && stored.is_in_active_review()
                }
            })
            .map(|stored| stored.file.clone())
    }

    pub fn get(&self, who: &Identity, id: Uuid) -> StoreResult<PatientFile> {
        let stored = self.files.get(&id).ok_or(StoreError::NotFound)?;
        let visible = stored.is_owned_by(who)
            || (who.role.is_reviewer() && stored.file.file_status != FileStatus::Draft);
        if !visible {
            return Err(StoreError::Forbidden("file belongs to another user".into()));
        }
        Ok(stored.file.clone())
    }

    pub fn list(&self, who: &Identity, view: ListView) -> Vec<PatientFileSummary> {
        let mut rows: Vec<PatientFileSummary> = self
            .files
            .values()
            .filter(|stored| match view {
                ListView::PatientFiles if who.role.is_intake() => stored.is_owned_by(who),
                ListView::PatientFiles => stored.file.file_status != FileStatus::Draft,
                ListView::TodaysClinics if who.role.is_reviewer() => {
                    let status = stored.file.file_status;
                    status == FileStatus::Submitted
                        || (status == FileStatus::PendingApproval && who.role == Role::Doctor)
                        || (stored.is_held_by(who) && stored.is_in_active_review())
                }
                ListView::TodaysClinics => false,
                ListView::PendingFiles => {
                    stored.is_owned_by(who)
                        && stored.file.file_status == FileStatus::Referred
                        && !stored.file.patient_referred
                }
                ListView::Overview => stored.is_owned_by(who),
            })
            .filter_map(|stored| PatientFileSummary::from_file(&stored.file))
            .collect();
        rows.sort_by(|a, b| a.id_number.cmp(&b.id_number));
        rows
    }

    // ------------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------------

    /// Open a new draft for `who`.
    pub fn create(&mut self, who: &Identity, patient: Option<Patient>) -> StoreResult<PatientFile> {
        if !who.role.is_intake() {
            return Err(StoreError::Forbidden(
                "only optometrists and practices open patient files".into(),
            ));
        }
        if self.in_progress(who).is_some() {
            return Err(StoreError::Conflict(
                "an in-progress patient file already exists".into(),
            ));
        }

        self.next_number += 1;
        let mut file = PatientFile::new_draft(format!("PF-{:05}", self.next_number));
        file.patient = patient;

        let id = file.id.unwrap_or_else(Uuid::new_v4);
        self.files.insert(
            id,
            StoredFile {
                owner_id: who.id.clone(),
                owner_role: who.role,
                file: file.clone(),
            },
        );
        Ok(file)
    }

    pub fn submit_stage(
        &mut self,
        who: &Identity,
        id: Uuid,
        stage: StageTitle,
        payload: StagePayload,
    ) -> StoreResult<Mutation> {
        match stage {
            StageTitle::ReferralForm
            | StageTitle::LeftEyeImages
            | StageTitle::RightEyeImages
            | StageTitle::CommunicationPreferences => {
                let stored = self.owned_mut(who, id)?;
                let status = stored.file.file_status;
                if !stored.is_in_progress_for_owner() {
                    return Err(StoreError::Conflict(format!(
                        "file is {status} and can no longer be edited"
                    )));
                }
                if status.is_rejected() && stage != StageTitle::ReferralForm {
                    return Err(StoreError::Conflict(
                        "only the referral form can be corrected on a rejected file".into(),
                    ));
                }

                let file = &mut stored.file;
                match stage {
                    StageTitle::ReferralForm => file.referral_form = Some(form(payload)?),
                    StageTitle::LeftEyeImages => file.left_eye_images = Some(images(payload)?),
                    StageTitle::RightEyeImages => file.right_eye_images = Some(images(payload)?),
                    _ => file.communication_form = Some(form(payload)?),
                }
                Ok(Mutation::quiet(file.clone()))
            }
            StageTitle::DraftDiagnosisForm => {
                let stored = self.held_mut(who, id)?;
                if !stored.is_in_active_review() {
                    return Err(StoreError::Conflict("file is not in review".into()));
                }
                let diagnosis: DiagnosisForm = serde_json::from_value(payload.data)
                    .map_err(|e| StoreError::BadRequest(format!("invalid diagnosis form: {e}")))?;
                stored.file.diagnosis_form = Some(diagnosis);
                Ok(Mutation::announce(
                    stored.file.clone(),
                    ServerEvent::DiagnosisFormAdded,
                ))
            }
            other => Err(StoreError::BadRequest(format!(
                "stage {other} does not accept a payload"
            ))),
        }
    }

    /// Hand a draft (or corrected rejected file) to review.
    pub fn submit(&mut self, who: &Identity, id: Uuid) -> StoreResult<Mutation> {
        let stored = self.owned_mut(who, id)?;
        let file = &mut stored.file;
        if file.file_status == FileStatus::Draft && !file.is_ready_to_submit() {
            return Err(StoreError::BadRequest(
                "referral form, eye images and communication preferences are required".into(),
            ));
        }

        file.file_status = file.file_status.transition(FileStatus::Submitted)?;
        file.reviewed_by = None;
        file.rejection_reasons = None;

        let event = match stored.owner_role {
            Role::Practice => ServerEvent::FileSubmittedFromPractice,
            _ => ServerEvent::FileSubmittedFromOptometrist,
        };
        Ok(Mutation::announce(stored.file.clone(), event))
    }

    /// Discard a draft.
    pub fn cancel(&mut self, who: &Identity, id: Uuid) -> StoreResult<Mutation> {
        let stored = self.owned_mut(who, id)?;
        if stored.file.file_status != FileStatus::Draft {
            return Err(StoreError::Conflict(
                "only draft files can be cancelled".into(),
            ));
        }
        self.files.remove(&id);
        Ok(Mutation {
            file: None,
            event: None,
        })
    }

    // ------------------------------------------------------------------------
    // Review
    // ------------------------------------------------------------------------

    /// A reader or doctor takes a file. Fails with a conflict when someone else holds it or the
    /// claimant already holds another file.
    pub fn claim(&mut self, who: &Identity, id: Uuid) -> StoreResult<Mutation> {
        if !who.role.is_reviewer() {
            return Err(StoreError::Forbidden(
                "only readers and doctors review files".into(),
            ));
        }

        let stored = self.files.get(&id).ok_or(StoreError::NotFound)?;
        if stored.is_in_active_review() {
            if stored.is_held_by(who) {
                return Ok(Mutation::quiet(stored.file.clone()));
            }
            return Err(StoreError::Conflict(
                "file is already being reviewed by another professional".into(),
            ));
        }

        let already_holding = self
            .files
            .values()
            .any(|other| other.id() != Some(id) && other.is_held_by(who) && other.is_in_active_review());
        if already_holding {
            return Err(StoreError::Conflict(
                "finish your in-progress file before claiming another".into(),
            ));
        }

        let stored = self.files.get_mut(&id).ok_or(StoreError::NotFound)?;
        let (next, event) = match who.role {
            Role::Doctor => (FileStatus::InReviewByDoctor, ServerEvent::FileMovedToDoctor),
            _ => (FileStatus::InReviewByReader, ServerEvent::FileMovedToReader),
        };
        stored.file.file_status = stored.file.file_status.transition(next)?;
        stored.file.reviewed_by = Some(Professional {
            id: who.id.clone(),
            name: Some(who.name.clone()),
            role: Some(who.role),
        });
        Ok(Mutation::announce(stored.file.clone(), event))
    }

    /// Reader hands a drafted diagnosis to a doctor for approval.
    pub fn send_for_approval(&mut self, who: &Identity, id: Uuid) -> StoreResult<Mutation> {
        let stored = self.held_mut(who, id)?;
        require_diagnosis(&stored.file)?;
        stored.file.file_status = stored
            .file
            .file_status
            .transition(FileStatus::PendingApproval)?;
        stored.file.reviewed_by = None;
        Ok(Mutation::announce(
            stored.file.clone(),
            ServerEvent::FileSentForApproval,
        ))
    }

    pub fn approve(&mut self, who: &Identity, id: Uuid) -> StoreResult<Mutation> {
        if who.role != Role::Doctor {
            return Err(StoreError::Forbidden("only doctors approve files".into()));
        }
        let stored = self.held_mut(who, id)?;
        require_diagnosis(&stored.file)?;
        stored.file.file_status = stored.file.file_status.transition(FileStatus::Approved)?;
        Ok(Mutation::announce(
            stored.file.clone(),
            ServerEvent::FileApproved,
        ))
    }

    pub fn record_outcome(
        &mut self,
        who: &Identity,
        id: Uuid,
        outcome: DiagnosisOutcome,
    ) -> StoreResult<Mutation> {
        let stored = self.held_mut(who, id)?;
        stored.file.file_status = stored
            .file
            .file_status
            .transition(outcome.file_status())?;
        stored
            .file
            .diagnosis_form
            .get_or_insert_with(DiagnosisForm::default)
            .outcome = Some(outcome);

        let event = match outcome {
            DiagnosisOutcome::Referred => ServerEvent::FileReferred,
            _ => ServerEvent::FileApproved,
        };
        Ok(Mutation::announce(stored.file.clone(), event))
    }

    pub fn reject(
        &mut self,
        who: &Identity,
        id: Uuid,
        status: FileStatus,
        reasons: Vec<String>,
    ) -> StoreResult<Mutation> {
        if !status.is_rejected() {
            return Err(StoreError::BadRequest(format!(
                "{status} is not a rejection status"
            )));
        }
        let stored = self.held_mut(who, id)?;
        stored.file.file_status = stored.file.file_status.transition(status)?;
        stored.file.rejection_reasons = Some(reasons);
        Ok(Mutation::announce(
            stored.file.clone(),
            ServerEvent::FileRejected,
        ))
    }

    /// Release a file whose reviewer went quiet back to the queue.
    pub fn close_by_timeout(&mut self, id: Uuid) -> StoreResult<Mutation> {
        let stored = self.files.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !stored.is_in_active_review() {
            return Err(StoreError::Conflict("file is not in review".into()));
        }
        stored.file.file_status = stored.file.file_status.transition(FileStatus::Submitted)?;
        stored.file.reviewed_by = None;
        Ok(Mutation::announce(
            stored.file.clone(),
            ServerEvent::FileClosedByTimeout,
        ))
    }

    // ------------------------------------------------------------------------
    // Referral confirmation
    // ------------------------------------------------------------------------

    pub fn record_consent(
        &mut self,
        who: &Identity,
        id: Uuid,
        signed_by: Option<String>,
    ) -> StoreResult<Mutation> {
        let stored = self.pending_referral_mut(who, id)?;
        stored.file.patient_consent = Some(PatientConsent {
            signed_at: Utc::now(),
            signed_by,
        });
        Ok(Mutation::announce(
            stored.file.clone(),
            ServerEvent::PatientConsentSigned,
        ))
    }

    pub fn record_payment(
        &mut self,
        who: &Identity,
        id: Uuid,
        amount_minor: i64,
        currency: String,
    ) -> StoreResult<Mutation> {
        if amount_minor <= 0 {
            return Err(StoreError::BadRequest("amount must be positive".into()));
        }
        let stored = self.pending_referral_mut(who, id)?;
        if !stored.file.has_patient_consent() {
            return Err(StoreError::Conflict(
                "patient consent is required before payment".into(),
            ));
        }
        stored.file.payment = Some(PaymentRecord {
            amount_minor,
            currency,
            paid_at: Utc::now(),
        });
        Ok(Mutation::announce(
            stored.file.clone(),
            ServerEvent::PaymentCompleted,
        ))
    }

    pub fn confirm_referral(&mut self, who: &Identity, id: Uuid) -> StoreResult<Mutation> {
        let stored = self.pending_referral_mut(who, id)?;
        if !(stored.file.has_patient_consent() && stored.file.has_payment()) {
            return Err(StoreError::Conflict(
                "consent and payment are required to confirm the referral".into(),
            ));
        }
        stored.file.patient_referred = true;
        Ok(Mutation::quiet(stored.file.clone()))
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn owned_mut(&mut self, who: &Identity, id: Uuid) -> StoreResult<&mut StoredFile> {
        let stored = self.files.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !stored.is_owned_by(who) {
            return Err(StoreError::Forbidden("file belongs to another user".into()));
        }
        Ok(stored)
    }

    fn held_mut(&mut self, who: &Identity, id: Uuid) -> StoreResult<&mut StoredFile> {
        let stored = self.files.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !stored.is_held_by(who) {
            return Err(StoreError::Conflict(
                "file is not held by the caller".into(),
            ));
        }
        Ok(stored)
    }

    fn pending_referral_mut(&mut self, who: &Identity, id: Uuid) -> StoreResult<&mut StoredFile> {
        let stored = self.owned_mut(who, id)?;
        if stored.file.file_status != FileStatus::Referred || stored.file.patient_referred {
            return Err(StoreError::Conflict(
                "file is not awaiting referral confirmation".into(),
            ));
        }
        Ok(stored)
    }
}

fn require_diagnosis(file: &PatientFile) -> StoreResult<()> {
    if file.has_diagnosis_form() {
        Ok(())
    } else {
        Err(StoreError::Conflict(
            "a diagnosis form is required first".into(),
        ))
    }
}

fn form(payload: StagePayload) -> StoreResult<referral_core::FormData> {
    match payload.data {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StoreError::BadRequest("form stages expect an object".into())),
    }
}

fn images(payload: StagePayload) -> StoreResult<Vec<EyeImage>> {
    serde_json::from_value(payload.data)
        .map_err(|e| StoreError::BadRequest(format!("invalid eye images: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn who(id: &str, role: Role) -> Identity {
        Identity {
            id: id.into(),
            name: id.into(),
            role,
            practice: None,
        }
    }

    fn ready_file(store: &mut FileStore, owner: &Identity) -> Uuid {
        let id = store.create(owner, None).unwrap().id.unwrap();
        let image = json!([{ "id": "img-1", "url": "https://images.example.org/1.png" }]);
        store
            .submit_stage(owner, id, StageTitle::ReferralForm, StagePayload { data: json!({"reason": "floaters"}) })
            .unwrap();
        store
            .submit_stage(owner, id, StageTitle::LeftEyeImages, StagePayload { data: image.clone() })
            .unwrap();
        store
            .submit_stage(owner, id, StageTitle::RightEyeImages, StagePayload { data: image })
            .unwrap();
        store
            .submit_stage(owner, id, StageTitle::CommunicationPreferences, StagePayload { data: json!({"email": true}) })
            .unwrap();
        id
    }

    #[test]
    fn one_in_progress_file_per_owner() {
        let mut store = FileStore::new();
        let opt = who("opt-1", Role::Optometrist);
        store.create(&opt, None).unwrap();

        let err = store.create(&opt, None).expect_err("second draft");
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.in_progress(&opt).is_some());
    }

    #[test]
    fn incomplete_draft_cannot_be_submitted() {
        let mut store = FileStore::new();
        let opt = who("opt-1", Role::Optometrist);
        let id = store.create(&opt, None).unwrap().id.unwrap();
        assert!(matches!(
            store.submit(&opt, id),
            Err(StoreError::BadRequest(_))
        ));
    }

    #[test]
    fn submission_event_depends_on_owner_role() {
        let mut store = FileStore::new();
        let practice = who("practice-1", Role::Practice);
        let id = ready_file(&mut store, &practice);
        let mutation = store.submit(&practice, id).unwrap();
        assert_eq!(mutation.event, Some(ServerEvent::FileSubmittedFromPractice));
        assert!(store.in_progress(&practice).is_none());
    }

    #[test]
    fn second_reviewer_claim_conflicts() {
        let mut store = FileStore::new();
        let opt = who("opt-1", Role::Optometrist);
        let id = ready_file(&mut store, &opt);
        store.submit(&opt, id).unwrap();

        let reader = who("reader-1", Role::Reader);
        let doctor = who("doctor-1", Role::Doctor);
        let claimed = store.claim(&reader, id).unwrap();
        assert_eq!(claimed.event, Some(ServerEvent::FileMovedToReader));

        let err = store.claim(&doctor, id).expect_err("already held");
        assert!(matches!(err, StoreError::Conflict(_)));

        // Re-claiming your own file is a no-op.
        assert!(store.claim(&reader, id).unwrap().event.is_none());
    }

    #[test]
    fn reviewer_holds_one_file_at_a_time() {
        let mut store = FileStore::new();
        let opt_a = who("opt-a", Role::Optometrist);
        let opt_b = who("opt-b", Role::Optometrist);
        let a = ready_file(&mut store, &opt_a);
        let b = ready_file(&mut store, &opt_b);
        store.submit(&opt_a, a).unwrap();
        store.submit(&opt_b, b).unwrap();

        let doctor = who("doctor-1", Role::Doctor);
        store.claim(&doctor, a).unwrap();
        assert!(matches!(store.claim(&doctor, b), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn rejected_file_only_accepts_referral_corrections() {
        let mut store = FileStore::new();
        let opt = who("opt-1", Role::Optometrist);
        let id = ready_file(&mut store, &opt);
        store.submit(&opt, id).unwrap();

        let reader = who("reader-1", Role::Reader);
        store.claim(&reader, id).unwrap();
        let rejected = store
            .reject(
                &reader,
                id,
                FileStatus::RejectedDueToMediaOpacity,
                vec!["cataract obscures fundus".into()],
            )
            .unwrap();
        assert_eq!(rejected.event, Some(ServerEvent::FileRejected));
        assert!(store.in_progress(&opt).is_some());

        let err = store
            .submit_stage(&opt, id, StageTitle::LeftEyeImages, StagePayload { data: json!([]) })
            .expect_err("images are locked");
        assert!(matches!(err, StoreError::Conflict(_)));
        store
            .submit_stage(&opt, id, StageTitle::ReferralForm, StagePayload { data: json!({"reason": "retake"}) })
            .unwrap();
        assert_eq!(
            store.submit(&opt, id).unwrap().file.unwrap().file_status,
            FileStatus::Submitted
        );
    }

    #[test]
    fn full_referral_walk() {
        let mut store = FileStore::new();
        let opt = who("opt-1", Role::Optometrist);
        let doctor = who("doctor-1", Role::Doctor);
        let id = ready_file(&mut store, &opt);
        store.submit(&opt, id).unwrap();
        store.claim(&doctor, id).unwrap();

        assert!(matches!(store.approve(&doctor, id), Err(StoreError::Conflict(_))));
        let drafted = store
            .submit_stage(&doctor, id, StageTitle::DraftDiagnosisForm, StagePayload { data: json!({"findings": "AMD"}) })
            .unwrap();
        assert_eq!(drafted.event, Some(ServerEvent::DiagnosisFormAdded));
        store.approve(&doctor, id).unwrap();
        let referred = store
            .record_outcome(&doctor, id, DiagnosisOutcome::Referred)
            .unwrap();
        assert_eq!(referred.event, Some(ServerEvent::FileReferred));
        assert_eq!(store.list(&opt, ListView::PendingFiles).len(), 1);

        assert!(matches!(
            store.record_payment(&opt, id, 5000, "GBP".into()),
            Err(StoreError::Conflict(_))
        ));
        store.record_consent(&opt, id, Some("patient".into())).unwrap();
        let paid = store.record_payment(&opt, id, 5000, "GBP".into()).unwrap();
        assert_eq!(paid.event, Some(ServerEvent::PaymentCompleted));
        let confirmed = store.confirm_referral(&opt, id).unwrap().file.unwrap();
        assert!(confirmed.patient_referred);
        assert!(store.list(&opt, ListView::PendingFiles).is_empty());
    }

    #[test]
    fn timeout_returns_file_to_queue() {
        let mut store = FileStore::new();
        let opt = who("opt-1", Role::Optometrist);
        let reader = who("reader-1", Role::Reader);
        let id = ready_file(&mut store, &opt);
        store.submit(&opt, id).unwrap();
        store.claim(&reader, id).unwrap();

        let closed = store.close_by_timeout(id).unwrap();
        assert_eq!(closed.event, Some(ServerEvent::FileClosedByTimeout));
        assert!(store.in_progress(&reader).is_none());
        assert_eq!(store.list(&reader, ListView::TodaysClinics).len(), 1);
    }

    #[test]
    fn drafts_are_private_to_their_owner() {
        let mut store = FileStore::new();
        let opt = who("opt-1", Role::Optometrist);
        let id = store.create(&opt, None).unwrap().id.unwrap();

        assert!(matches!(
            store.get(&who("doctor-1", Role::Doctor), id),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            store.get(&who("opt-2", Role::Optometrist), id),
            Err(StoreError::Forbidden(_))
        ));
        store.cancel(&opt, id).unwrap();
        assert!(store.is_empty());
    }
}
