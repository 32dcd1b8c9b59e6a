//! Application context.
//!
//! The single place where sessions, the event bus, route protection and notifications meet.
//! Consumers receive a [`PortalContext`] instead of reaching for globals.

use crate::bus::EventBusClient;
use crate::idle::IdleWatcher;
use crate::notify::Notifier;
use crate::rest::RestClient;
use referral_core::{
    CoreConfig, PortalError, PortalResult, RoleRouteTable, RouteDecision, Session, SessionKind,
    SessionStore,
};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

#[derive(Clone, Debug)]
pub struct PortalContext {
    config: CoreConfig,
    sessions: SessionStore,
    bus: EventBusClient,
    notifier: Notifier,
    routes: RoleRouteTable,
    idle_rearm: Arc<Mutex<Weak<Notify>>>,
}

impl PortalContext {
    pub fn new(config: CoreConfig) -> Self {
        let bus = EventBusClient::new(&config);
        Self::with_bus(config, bus)
    }

    pub fn with_bus(config: CoreConfig, bus: EventBusClient) -> Self {
        Self {
            config,
            sessions: SessionStore::new(),
            bus,
            notifier: Notifier::default(),
            routes: RoleRouteTable::default_table(),
            idle_rearm: Arc::new(Mutex::new(Weak::new())),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn bus(&self) -> &EventBusClient {
        &self.bus
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Store `session`, open the event connection for it and restart the idle window.
    pub fn sign_in(&self, session: Session) {
        self.sessions.sign_in(session);
        self.bus.sync_with(&self.sessions);
        let rearm = self
            .idle_rearm
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade();
        if let Some(rearm) = rearm {
            rearm.notify_one();
        }
    }

    /// Clear one session. The event connection moves to the remaining session, or closes.
    pub fn sign_out(&self, kind: SessionKind) -> Option<Session> {
        let removed = self.sessions.sign_out(kind);
        self.bus.sync_with(&self.sessions);
        removed
    }

    /// Route protection for `path` against the current sessions.
    pub fn guard(&self, path: &str) -> RouteDecision {
        self.routes.guard(&self.sessions.snapshot(), path)
    }

    /// REST client for the session of `kind`.
    ///
    /// # Errors
    /// Returns `PortalError::Unauthorised` when that session is not signed in.
    pub fn api(&self, kind: SessionKind) -> PortalResult<RestClient> {
        let snapshot = self.sessions.snapshot();
        let session = snapshot.get(kind).ok_or(PortalError::Unauthorised)?;
        Ok(RestClient::for_session(&self.config, session))
    }

    /// Start the idle watcher for this context's sessions and bus.
    ///
    /// Later sign-ins re-arm it for as long as the returned watcher is alive.
    pub fn start_idle_watcher(&self) -> IdleWatcher {
        let watcher = IdleWatcher::start(
            self.config.idle_timeout(),
            self.sessions.clone(),
            self.bus.clone(),
        );
        *self.idle_rearm.lock().unwrap_or_else(|e| e.into_inner()) = watcher.rearm_handle();
        watcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusOptions;
    use crate::transport::ConnectionStatus;
    use referral_core::{Environment, Identity, Role};

    fn context() -> PortalContext {
        PortalContext::with_bus(
            CoreConfig::for_environment(Environment::Dev),
            EventBusClient::with_options("http://127.0.0.1:9", BusOptions::default()),
        )
    }

    fn session(kind: SessionKind, role: Role) -> Session {
        Session::new(
            kind,
            Identity {
                id: format!("{role}-1"),
                name: role.to_string(),
                role,
                practice: None,
            },
            format!("{role}-token"),
        )
    }

    #[tokio::test]
    async fn sign_out_closes_the_event_connection() {
        let ctx = context();
        ctx.sign_in(session(SessionKind::Web, Role::Optometrist));
        assert_ne!(*ctx.bus().status().borrow(), ConnectionStatus::Disconnected);

        ctx.sign_out(SessionKind::Web);
        assert_eq!(*ctx.bus().status().borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn api_requires_a_session() {
        let ctx = context();
        assert!(matches!(
            ctx.api(SessionKind::Tablet),
            Err(PortalError::Unauthorised)
        ));
        ctx.sign_in(session(SessionKind::Tablet, Role::Optometrist));
        assert_eq!(ctx.api(SessionKind::Tablet).unwrap().base_url(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn guard_uses_current_sessions() {
        let ctx = context();
        assert_eq!(
            ctx.guard("/patient-files"),
            RouteDecision::Redirect("/login".into())
        );
        ctx.sign_in(session(SessionKind::Web, Role::Optometrist));
        assert_eq!(
            ctx.guard("/overview"),
            RouteDecision::Redirect("/availability".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_rearms_an_expired_idle_watcher() {
        let ctx = context();
        ctx.sign_in(session(SessionKind::Web, Role::Doctor));
        let watcher = ctx.start_idle_watcher();

        watcher.wait_expired().await;
        assert!(ctx.sessions().web().is_none());
        assert_eq!(*ctx.bus().status().borrow(), ConnectionStatus::Disconnected);

        ctx.sign_in(session(SessionKind::Web, Role::Doctor));
        tokio::task::yield_now().await;
        assert!(!watcher.is_expired());

        watcher.wait_expired().await;
        assert!(ctx.sessions().web().is_none());
    }
}
