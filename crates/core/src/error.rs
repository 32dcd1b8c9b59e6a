use crate::file::FileStatus;

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown event topic: {0}")]
    UnknownTopic(String),
    #[error("unknown file status: {0}")]
    UnknownStatus(String),
    #[error("unknown stage: {0}")]
    UnknownStage(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),
    #[error("file cannot move from {from} to {to}")]
    InvalidTransition { from: FileStatus, to: FileStatus },

    #[error("network error: {0}")]
    Network(String),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not authorised")]
    Unauthorised,
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PortalError {
    /// Message shown to the user when this error reaches the notification channel.
    pub fn user_message(&self) -> String {
        match self {
            PortalError::Network(_) => "Unable to reach the server. Please try again.".into(),
            PortalError::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            PortalError::Conflict(message) => message.clone(),
            PortalError::Unauthorised => "Your session has expired. Please sign in again.".into(),
            _ => "Something went wrong. Please try again.".into(),
        }
    }
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;
