//! Session and role context.
//!
//! Holds the authenticated identity, role and practice affiliation for the web portal and the
//! tablet companion flow. The two sessions are independent: signing in or out of one never
//! touches the other.
//!
//! `SessionStore` is the explicit application-state container. It is cloned into whatever
//! needs it (route guard, screens, event bus wiring) instead of living in a global.

use crate::error::PortalError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Portal role of an authenticated user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Optometrist,
    Practice,
    Reader,
    Doctor,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Optometrist, Role::Practice, Role::Reader, Role::Doctor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Optometrist => "optometrist",
            Role::Practice => "practice",
            Role::Reader => "reader",
            Role::Doctor => "doctor",
        }
    }

    /// Roles that open and fill in new patient files.
    pub fn is_intake(&self) -> bool {
        matches!(self, Role::Optometrist | Role::Practice)
    }

    /// Roles that review files and write diagnoses.
    pub fn is_reviewer(&self) -> bool {
        matches!(self, Role::Reader | Role::Doctor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| PortalError::UnknownRole(s.to_string()))
    }
}

/// Which surface a session belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Web,
    Tablet,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Web => "web",
            SessionKind::Tablet => "tablet",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Practice {
    pub id: String,
    pub name: String,
}

/// Who is signed in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub practice: Option<Practice>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub kind: SessionKind,
    pub identity: Identity,
    pub refresh_token: String,
    pub signed_in_at: DateTime<Utc>,
}

impl Session {
    pub fn new(kind: SessionKind, identity: Identity, refresh_token: impl Into<String>) -> Self {
        Self {
            kind,
            identity,
            refresh_token: refresh_token.into(),
            signed_in_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.identity.role
    }
}

/// Snapshot of both sessions at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub web: Option<Session>,
    pub tablet: Option<Session>,
}

impl SessionState {
    pub fn get(&self, kind: SessionKind) -> Option<&Session> {
        match kind {
            SessionKind::Web => self.web.as_ref(),
            SessionKind::Tablet => self.tablet.as_ref(),
        }
    }

    /// The session that owns the event channel. Web wins when both are signed in on the
    /// same device.
    pub fn event_session(&self) -> Option<&Session> {
        self.web.as_ref().or(self.tablet.as_ref())
    }

    pub fn is_signed_in(&self, kind: SessionKind) -> bool {
        self.get(kind).is_some()
    }
}

/// Shared handle over the current [`SessionState`].
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SessionState {
        self.read().clone()
    }

    pub fn web(&self) -> Option<Session> {
        self.read().web.clone()
    }

    pub fn tablet(&self) -> Option<Session> {
        self.read().tablet.clone()
    }

    /// Store `session`, replacing any existing session of the same kind.
    pub fn sign_in(&self, session: Session) {
        tracing::info!(
            kind = %session.kind,
            role = %session.identity.role,
            user = %session.identity.id,
            "session signed in"
        );
        let mut state = self.write();
        match session.kind {
            SessionKind::Web => state.web = Some(session),
            SessionKind::Tablet => state.tablet = Some(session),
        }
    }

    /// Clear the session of the given kind. Returns the session that was removed.
    pub fn sign_out(&self, kind: SessionKind) -> Option<Session> {
        let removed = {
            let mut state = self.write();
            match kind {
                SessionKind::Web => state.web.take(),
                SessionKind::Tablet => state.tablet.take(),
            }
        };
        if removed.is_some() {
            tracing::info!(kind = %kind, "session signed out");
        }
        removed
    }

    /// Clear both sessions, e.g. after the idle timeout fires.
    pub fn expire_all(&self) {
        let mut state = self.write();
        state.web = None;
        state.tablet = None;
    }

    /// Replace the identity of an existing session (profile edits, practice switch).
    ///
    /// Returns `false` when no session of that kind is signed in.
    pub fn update_identity(&self, kind: SessionKind, identity: Identity) -> bool {
        let mut state = self.write();
        let slot = match kind {
            SessionKind::Web => state.web.as_mut(),
            SessionKind::Tablet => state.tablet.as_mut(),
        };
        match slot {
            Some(session) => {
                session.identity = identity;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: id.into(),
            name: format!("User {id}"),
            role,
            practice: None,
        }
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Doctor".parse::<Role>().unwrap(), Role::Doctor);
        assert!("nurse".parse::<Role>().is_err());
    }

    #[test]
    fn web_and_tablet_sessions_are_independent() {
        let store = SessionStore::new();
        store.sign_in(Session::new(
            SessionKind::Web,
            identity("opt-1", Role::Optometrist),
            "web-token",
        ));
        store.sign_in(Session::new(
            SessionKind::Tablet,
            identity("opt-1", Role::Optometrist),
            "tablet-token",
        ));

        store.sign_out(SessionKind::Tablet);

        let state = store.snapshot();
        assert!(state.is_signed_in(SessionKind::Web));
        assert!(!state.is_signed_in(SessionKind::Tablet));
    }

    #[test]
    fn event_session_prefers_web() {
        let store = SessionStore::new();
        store.sign_in(Session::new(
            SessionKind::Tablet,
            identity("opt-1", Role::Optometrist),
            "tablet-token",
        ));
        assert_eq!(
            store.snapshot().event_session().map(|s| s.kind),
            Some(SessionKind::Tablet)
        );

        store.sign_in(Session::new(
            SessionKind::Web,
            identity("opt-1", Role::Optometrist),
            "web-token",
        ));
        assert_eq!(
            store.snapshot().event_session().map(|s| s.kind),
            Some(SessionKind::Web)
        );
    }

    #[test]
    fn update_identity_requires_session() {
        let store = SessionStore::new();
        assert!(!store.update_identity(SessionKind::Web, identity("doc-1", Role::Doctor)));

        store.sign_in(Session::new(
            SessionKind::Web,
            identity("doc-1", Role::Doctor),
            "token",
        ));
        let mut renamed = identity("doc-1", Role::Doctor);
        renamed.name = "Dr Renamed".into();
        assert!(store.update_identity(SessionKind::Web, renamed));
        assert_eq!(store.web().unwrap().identity.name, "Dr Renamed");
    }

    #[test]
    fn expire_all_clears_both() {
        let store = SessionStore::new();
        store.sign_in(Session::new(
            SessionKind::Web,
            identity("r-1", Role::Reader),
            "a",
        ));
        store.sign_in(Session::new(
            SessionKind::Tablet,
            identity("r-1", Role::Reader),
            "b",
        ));
        store.expire_all();
        assert_eq!(store.snapshot(), SessionState::default());
    }
}
