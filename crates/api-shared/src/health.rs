use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
    pub version: String,
    /// Whether the streaming event endpoint is accepting connections. Polling is always on.
    pub streaming: bool,
}

/// Liveness report shared by the server and anything that probes it.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    /// # Arguments
    /// * `streaming_enabled` - Current state of the streaming event endpoint.
    pub fn check_health(streaming_enabled: bool) -> HealthRes {
        HealthRes {
            ok: true,
            message: "Referral API is alive".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            streaming: streaming_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_streaming_state() {
        assert!(HealthService::check_health(true).streaming);
        let res = HealthService::check_health(false);
        assert!(res.ok);
        assert!(!res.streaming);
    }
}
