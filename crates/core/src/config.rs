//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the client and server.
//! Nothing here reads process-wide environment variables; callers hand the raw values in, which
//! keeps tests independent of the environment they run in.

use crate::constants::{DEFAULT_EVENT_BUFFER, IDLE_TIMEOUT};
use crate::error::{PortalError, PortalResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Deployment environment, selected by a single flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Stage,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Stage => "stage",
            Environment::Prod => "prod",
        }
    }

    /// REST API base URL for this environment.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Environment::Dev => "http://localhost:3000",
            Environment::Test => "https://api.test.referrals.example.org",
            Environment::Stage => "https://api.stage.referrals.example.org",
            Environment::Prod => "https://api.referrals.example.org",
        }
    }

    /// Event channel base URL for this environment.
    pub fn events_base_url(&self) -> &'static str {
        match self {
            Environment::Dev => "http://localhost:3000",
            Environment::Test => "https://events.test.referrals.example.org",
            Environment::Stage => "https://events.stage.referrals.example.org",
            Environment::Prod => "https://events.referrals.example.org",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "stage" | "staging" => Ok(Environment::Stage),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(PortalError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    environment: Environment,
    api_base_url: String,
    events_base_url: String,
    idle_timeout: Duration,
    event_buffer: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidInput`] if either URL is not an absolute http(s) URL, the
    /// idle timeout is zero, or the event buffer is zero.
    pub fn new(
        environment: Environment,
        api_base_url: impl Into<String>,
        events_base_url: impl Into<String>,
        idle_timeout: Duration,
        event_buffer: usize,
    ) -> PortalResult<Self> {
        let api_base_url = normalise_base_url("api_base_url", api_base_url.into())?;
        let events_base_url = normalise_base_url("events_base_url", events_base_url.into())?;

        if idle_timeout.is_zero() {
            return Err(PortalError::InvalidInput(
                "idle_timeout must be greater than zero".into(),
            ));
        }
        if event_buffer == 0 {
            return Err(PortalError::InvalidInput(
                "event_buffer must be greater than zero".into(),
            ));
        }

        Ok(Self {
            environment,
            api_base_url,
            events_base_url,
            idle_timeout,
            event_buffer,
        })
    }

    /// Defaults for `environment`.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            api_base_url: environment.api_base_url().to_string(),
            events_base_url: environment.events_base_url().to_string(),
            idle_timeout: IDLE_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Apply optional URL overrides on top of the environment defaults.
    ///
    /// Empty or whitespace-only overrides are ignored.
    pub fn with_overrides(
        self,
        api_base_url: Option<String>,
        events_base_url: Option<String>,
    ) -> PortalResult<Self> {
        let api = non_empty(api_base_url).unwrap_or(self.api_base_url);
        let events = non_empty(events_base_url).unwrap_or(self.events_base_url);
        Self::new(
            self.environment,
            api,
            events,
            self.idle_timeout,
            self.event_buffer,
        )
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        if !idle_timeout.is_zero() {
            self.idle_timeout = idle_timeout;
        }
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn events_base_url(&self) -> &str {
        &self.events_base_url
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }
}

/// Parse the environment flag from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`Environment::Dev`].
pub fn environment_from_env_value(value: Option<String>) -> PortalResult<Environment> {
    non_empty(value)
        .map(|v| v.parse::<Environment>())
        .transpose()
        .map(Option::unwrap_or_default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalise_base_url(field: &str, url: String) -> PortalResult<String> {
    let url = url.trim().trim_end_matches('/').to_string();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(PortalError::InvalidInput(format!(
            "{field} must be an absolute http(s) URL, got {url:?}"
        )));
    }
    Ok(url)
}
