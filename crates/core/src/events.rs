//! Server-pushed event topics and the refresh signals they produce.
//!
//! Events carry nothing but a topic name. Consumers never trust payload content: a topic only
//! tells a view that its data may be stale, and the view re-fetches authoritative state.
//! Topic strings are closed into [`ServerEvent`] at the boundary; anything else is rejected.

use crate::error::PortalError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Named events the backend emits over the event channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    FileSubmittedFromPractice,
    FileSubmittedFromOptometrist,
    FileMovedToReader,
    FileMovedToDoctor,
    FileSentForApproval,
    FileApproved,
    FileReferred,
    FileRejected,
    DiagnosisFormAdded,
    FileClosedByTimeout,
    PatientConsentSigned,
    PaymentCompleted,
}

impl ServerEvent {
    pub const ALL: [ServerEvent; 12] = [
        ServerEvent::FileSubmittedFromPractice,
        ServerEvent::FileSubmittedFromOptometrist,
        ServerEvent::FileMovedToReader,
        ServerEvent::FileMovedToDoctor,
        ServerEvent::FileSentForApproval,
        ServerEvent::FileApproved,
        ServerEvent::FileReferred,
        ServerEvent::FileRejected,
        ServerEvent::DiagnosisFormAdded,
        ServerEvent::FileClosedByTimeout,
        ServerEvent::PatientConsentSigned,
        ServerEvent::PaymentCompleted,
    ];

    /// Wire topic name.
    pub fn topic(&self) -> &'static str {
        match self {
            ServerEvent::FileSubmittedFromPractice => "FILE_SUBMITTED_FROM_PRACTICE",
            ServerEvent::FileSubmittedFromOptometrist => "FILE_SUBMITTED_FROM_OPTOMETRIST",
            ServerEvent::FileMovedToReader => "FILE_MOVED_TO_READER",
            ServerEvent::FileMovedToDoctor => "FILE_MOVED_TO_DOCTOR",
            ServerEvent::FileSentForApproval => "FILE_SENT_FOR_APPROVAL",
            ServerEvent::FileApproved => "FILE_APPROVED",
            ServerEvent::FileReferred => "FILE_REFERRED",
            ServerEvent::FileRejected => "FILE_REJECTED",
            ServerEvent::DiagnosisFormAdded => "DIAGNOSIS_FORM_ADDED",
            ServerEvent::FileClosedByTimeout => "FILE_CLOSED_BY_TIMEOUT",
            ServerEvent::PatientConsentSigned => "PATIENT_CONSENT_SIGNED",
            ServerEvent::PaymentCompleted => "PAYMENT_COMPLETED",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            ServerEvent::FileSubmittedFromPractice
            | ServerEvent::FileSubmittedFromOptometrist
            | ServerEvent::FileMovedToReader
            | ServerEvent::FileMovedToDoctor
            | ServerEvent::FileSentForApproval
            | ServerEvent::FileApproved
            | ServerEvent::FileReferred
            | ServerEvent::FileRejected => EventCategory::FileHandoff,
            ServerEvent::DiagnosisFormAdded
            | ServerEvent::FileClosedByTimeout
            | ServerEvent::PatientConsentSigned => EventCategory::FileDetailChanged,
            ServerEvent::PaymentCompleted => EventCategory::PaymentCompleted,
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

impl FromStr for ServerEvent {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let topic = s.trim();
        ServerEvent::ALL
            .into_iter()
            .find(|event| event.topic() == topic)
            .ok_or_else(|| PortalError::UnknownTopic(topic.to_string()))
    }
}

/// What kind of change an event announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// A file moved between roles (submitted, claimed, referred, rejected...).
    FileHandoff,
    /// Something on an open file changed underneath the viewer.
    FileDetailChanged,
    PaymentCompleted,
}

impl EventCategory {
    pub fn load_mode(&self) -> LoadMode {
        match self {
            EventCategory::FileHandoff => LoadMode::Background,
            EventCategory::FileDetailChanged | EventCategory::PaymentCompleted => LoadMode::Silent,
        }
    }
}

/// How a fetch presents itself while in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Full loading state; used for first loads and explicit user actions.
    Blocking,
    /// Non-blocking indicator; existing data stays on screen.
    Background,
    /// No indicator at all.
    Silent,
}

impl LoadMode {
    /// Higher is more visible: blocking over background over silent.
    pub fn strength(&self) -> u8 {
        match self {
            LoadMode::Blocking => 2,
            LoadMode::Background => 1,
            LoadMode::Silent => 0,
        }
    }
}

/// List views backed by `GET /files?view=...`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListView {
    PatientFiles,
    TodaysClinics,
    PendingFiles,
    Overview,
}

impl ListView {
    pub const ALL: [ListView; 4] = [
        ListView::PatientFiles,
        ListView::TodaysClinics,
        ListView::PendingFiles,
        ListView::Overview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListView::PatientFiles => "patient-files",
            ListView::TodaysClinics => "todays-clinics",
            ListView::PendingFiles => "pending-files",
            ListView::Overview => "overview",
        }
    }
}

impl fmt::Display for ListView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListView {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListView::ALL
            .into_iter()
            .find(|view| view.as_str() == s.trim())
            .ok_or_else(|| PortalError::InvalidInput(format!("unknown list view: {s}")))
    }
}

/// Screens that react to server events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewId {
    /// Optometrist/practice screen holding their single in-progress file.
    CreatePatientRequest,
    /// Reader/doctor screen holding the file they are reviewing.
    InProgressFile,
    List(ListView),
    PendingFileDetail(Uuid),
}

impl ViewId {
    /// Topics this view re-fetches on.
    pub fn topics(&self) -> &'static [ServerEvent] {
        use ServerEvent::*;
        match self {
            ViewId::CreatePatientRequest => &[
                FileSubmittedFromPractice,
                FileSubmittedFromOptometrist,
                FileRejected,
                FileReferred,
                DiagnosisFormAdded,
                FileClosedByTimeout,
            ],
            ViewId::InProgressFile => &[
                FileMovedToDoctor,
                FileSentForApproval,
                FileApproved,
                FileRejected,
                DiagnosisFormAdded,
                FileClosedByTimeout,
            ],
            ViewId::List(ListView::PatientFiles) => &[
                FileSubmittedFromPractice,
                FileSubmittedFromOptometrist,
                FileMovedToReader,
                FileMovedToDoctor,
                FileSentForApproval,
                FileApproved,
                FileReferred,
                FileRejected,
            ],
            ViewId::List(ListView::TodaysClinics) => &[
                FileSubmittedFromPractice,
                FileSubmittedFromOptometrist,
                FileMovedToReader,
                FileMovedToDoctor,
                FileClosedByTimeout,
            ],
            ViewId::List(ListView::PendingFiles) => {
                &[FileReferred, PatientConsentSigned, PaymentCompleted]
            }
            ViewId::List(ListView::Overview) => &[
                FileSubmittedFromPractice,
                FileSubmittedFromOptometrist,
                FileReferred,
                FileRejected,
                PaymentCompleted,
            ],
            ViewId::PendingFileDetail(_) => {
                &[DiagnosisFormAdded, PatientConsentSigned, PaymentCompleted]
            }
        }
    }

    pub fn listens_to(&self, event: ServerEvent) -> bool {
        self.topics().contains(&event)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewId::CreatePatientRequest => f.write_str("create-patient-request"),
            ViewId::InProgressFile => f.write_str("in-progress-file"),
            ViewId::List(view) => write!(f, "list:{view}"),
            ViewId::PendingFileDetail(id) => write!(f, "pending-file:{id}"),
        }
    }
}

/// An event tag plus the view it invalidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshSignal {
    pub event: ServerEvent,
    pub view: ViewId,
    pub mode: LoadMode,
}

impl RefreshSignal {
    /// The signal `event` produces for `view`, or `None` if the view does not listen to it.
    pub fn for_view(event: ServerEvent, view: ViewId) -> Option<Self> {
        view.listens_to(event).then(|| Self {
            event,
            view,
            mode: event.category().load_mode(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_round_trip_through_strings() {
        for event in ServerEvent::ALL {
            assert_eq!(event.topic().parse::<ServerEvent>().unwrap(), event);
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.topic()));
        }
    }

    #[test]
    fn unknown_topic_is_rejected_at_the_boundary() {
        let err = "FILE_EXPLODED".parse::<ServerEvent>().expect_err("closed set");
        assert!(matches!(err, PortalError::UnknownTopic(t) if t == "FILE_EXPLODED"));
        assert!(serde_json::from_str::<ServerEvent>("\"FILE_EXPLODED\"").is_err());
    }

    #[test]
    fn handoff_outranks_detail_change() {
        let handoff = ServerEvent::FileSubmittedFromPractice.category().load_mode();
        let detail = ServerEvent::DiagnosisFormAdded.category().load_mode();
        assert!(handoff.strength() > detail.strength());
        assert!(LoadMode::Blocking.strength() > handoff.strength());
    }

    #[test]
    fn handoff_refreshes_in_background() {
        let signal = RefreshSignal::for_view(
            ServerEvent::FileSubmittedFromPractice,
            ViewId::CreatePatientRequest,
        )
        .expect("create-patient-request listens to practice submissions");
        assert_eq!(signal.mode, LoadMode::Background);
    }

    #[test]
    fn detail_changes_refresh_silently() {
        let signal =
            RefreshSignal::for_view(ServerEvent::DiagnosisFormAdded, ViewId::InProgressFile)
                .expect("in-progress file listens to diagnosis updates");
        assert_eq!(signal.mode, LoadMode::Silent);
    }

    #[test]
    fn payment_only_reaches_pending_views() {
        let id = Uuid::new_v4();
        assert!(RefreshSignal::for_view(
            ServerEvent::PaymentCompleted,
            ViewId::PendingFileDetail(id)
        )
        .is_some());
        assert!(
            RefreshSignal::for_view(ServerEvent::PaymentCompleted, ViewId::InProgressFile)
                .is_none()
        );
    }

    #[test]
    fn list_view_parses_kebab_case() {
        assert_eq!(
            "todays-clinics".parse::<ListView>().unwrap(),
            ListView::TodaysClinics
        );
        assert!("archive".parse::<ListView>().is_err());
    }
}
