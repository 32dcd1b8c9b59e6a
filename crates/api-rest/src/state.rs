//! Shared server state.

use crate::error::ApiError;
use crate::events::EventHub;
use crate::store::FileStore;
use api_shared::auth::parse_bearer;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use referral_core::{constants::DEFAULT_EVENT_BUFFER, Identity, Practice, Role};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Tunables for the event channel.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// When false the streaming endpoint answers 503 and clients fall back to polling.
    pub streaming_enabled: bool,
    pub poll_timeout: Duration,
    pub keep_alive: Duration,
    pub event_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            streaming_enabled: true,
            poll_timeout: Duration::from_secs(25),
            keep_alive: Duration::from_secs(15),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Application state for the REST API server
///
/// Cloned into every handler. The file store sits behind an async lock; events are emitted
/// after the lock is released.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<FileStore>>,
    pub hub: Arc<EventHub>,
    pub settings: Arc<ServerSettings>,
    users: Arc<HashMap<String, Identity>>,
}

impl AppState {
    /// # Arguments
    /// * `users` - Bearer token to identity map.
    /// * `settings` - Event channel tunables.
    pub fn new(users: HashMap<String, Identity>, settings: ServerSettings) -> Self {
        Self {
            store: Arc::new(RwLock::new(FileStore::new())),
            hub: Arc::new(EventHub::new(settings.event_buffer)),
            settings: Arc::new(settings),
            users: Arc::new(users),
        }
    }

    /// Resolve the caller from the `Authorization` header.
    ///
    /// # Errors
    /// Returns `ApiError::Unauthorised` if the header is missing, malformed, or carries an
    /// unknown token.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let token = parse_bearer(header)?;
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| ApiError::Unauthorised("session has expired".into()))
    }
}

/// Fixed identities for local development and tests.
///
/// | token            | user        | role        |
/// |------------------|-------------|-------------|
/// | `optometrist-1`  | opt-1       | optometrist |
/// | `tablet-1`       | opt-1       | optometrist |
/// | `practice-1`     | practice-1  | practice    |
/// | `reader-1`       | reader-1    | reader      |
/// | `doctor-1`       | doctor-1    | doctor      |
pub fn demo_users() -> HashMap<String, Identity> {
    let high_street = Practice {
        id: "practice-1".into(),
        name: "High Street Opticians".into(),
    };
    let optometrist = Identity {
        id: "opt-1".into(),
        name: "Olivia Optom".into(),
        role: Role::Optometrist,
        practice: Some(high_street.clone()),
    };

    HashMap::from([
        ("optometrist-1".to_string(), optometrist.clone()),
        ("tablet-1".to_string(), optometrist),
        (
            "practice-1".to_string(),
            Identity {
                id: "practice-1".into(),
                name: high_street.name.clone(),
                role: Role::Practice,
                practice: Some(high_street),
            },
        ),
        (
            "reader-1".to_string(),
            Identity {
                id: "reader-1".into(),
                name: "Rahul Reader".into(),
                role: Role::Reader,
                practice: None,
            },
        ),
        (
            "doctor-1".to_string(),
            Identity {
                id: "doctor-1".into(),
                name: "Dana Doctor".into(),
                role: Role::Doctor,
                practice: None,
            },
        ),
    ])
}
