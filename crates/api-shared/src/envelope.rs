//! Response envelope used by every REST endpoint.
//!
//! ```json
//! { "status": "success", "message": "", "data": { ... } }
//! ```
//!
//! `data` is `null` for operations with nothing to return and for "nothing found" reads such as
//! an optometrist with no in-progress file. An empty result is not an error.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: ApiStatus,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: ApiStatus::Success,
            message: String::new(),
            data: Some(data),
        }
    }

    /// Successful response with no data.
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ApiStatus::Success
    }

    /// Split into data on success or the message on error.
    pub fn into_result(self) -> Result<Option<T>, String> {
        match self.status {
            ApiStatus::Success => Ok(self.data),
            ApiStatus::Error => Err(self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_data_is_an_empty_success() {
        let env: Envelope<u32> =
            serde_json::from_str(r#"{"status":"success","message":"no file","data":null}"#)
                .unwrap();
        assert_eq!(env.into_result(), Ok(None));
    }

    #[test]
    fn missing_message_defaults_to_empty() {
        let env: Envelope<u32> = serde_json::from_str(r#"{"status":"success","data":7}"#).unwrap();
        assert_eq!(env.message, "");
        assert_eq!(env.into_result(), Ok(Some(7)));
    }

    #[test]
    fn error_carries_message() {
        let env: Envelope<u32> = Envelope::error("file is held by another reviewer");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(
            env.into_result(),
            Err("file is held by another reviewer".to_string())
        );
    }
}
