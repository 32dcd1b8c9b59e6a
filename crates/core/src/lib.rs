//! # Referral Core
//!
//! Core business logic for the referral portal.
//!
//! This crate contains the pure parts of the portal:
//! - the patient file model and its status lifecycle
//! - the stage state machine (stage set, active stage, enable/disable, completed, variant)
//! - role route protection
//! - the session store injected into every consumer
//! - the closed set of server event topics and the refresh signals they produce
//!
//! **No I/O**: HTTP, the event channel and timers belong in `referral-client` and `api-rest`.

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod file;
pub mod lifecycle;
pub mod routes;
pub mod session;

pub use config::{environment_from_env_value, CoreConfig, Environment};
pub use error::{PortalError, PortalResult};
pub use events::{EventCategory, ListView, LoadMode, RefreshSignal, ServerEvent, ViewId};
pub use file::{
    DiagnosisForm, DiagnosisOutcome, EyeImage, FileStatus, FormData, Patient, PatientConsent,
    PatientFile, PatientFileSummary, PaymentRecord, Professional,
};
pub use lifecycle::{
    compute_active_stage, compute_file_view, compute_stage_set, is_stage_completed,
    render_variant, FileView, StageDescriptor, StageSequence, StageState, StageTitle,
    StageTracker, StageVariant, StagedView,
};
pub use routes::{RoleRouteTable, RouteDecision};
pub use session::{Identity, Practice, Role, Session, SessionKind, SessionState, SessionStore};
