//! Request bodies for file operations.

use referral_core::{DiagnosisOutcome, FileStatus, FormData, Patient};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Open a new draft file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileReq {
    #[serde(default)]
    #[schema(value_type = Object, nullable)]
    pub patient: Option<Patient>,
}

/// Payload for one stage of the intake or review flow.
///
/// `data` is stage-specific. Form stages send an object; image stages send an array of
/// `{id, url}` objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StagePayload {
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

impl StagePayload {
    pub fn form(form: FormData) -> Self {
        Self {
            data: serde_json::Value::Object(form),
        }
    }
}

/// Reviewer rejects a file back to its owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RejectReq {
    /// One of the two rejection statuses.
    #[schema(value_type = String)]
    pub status: FileStatus,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Record the diagnosis outcome on an approved file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OutcomeReq {
    #[schema(value_type = String)]
    pub outcome: DiagnosisOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsentReq {
    #[serde(default)]
    pub signed_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReq {
    pub amount_minor: i64,
    pub currency: String,
}

/// Developer hook: emit a topic on the event channel by hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EmitEventReq {
    pub topic: String,
}
