//! Client-side idle timeout.
//!
//! Independent of server session expiry: if nothing calls [`IdleWatcher::touch`] for the
//! configured window, every session is cleared and the event connection is closed. The watcher
//! then sleeps until [`IdleWatcher::rearm`] (called by `PortalContext::sign_in`) opens a fresh
//! window.

use crate::bus::EventBusClient;
use referral_core::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

pub struct IdleWatcher {
    activity: Arc<Notify>,
    rearm: Arc<Notify>,
    expired: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl IdleWatcher {
    /// Start watching. Must be called from within a tokio runtime.
    pub fn start(timeout: Duration, sessions: SessionStore, bus: EventBusClient) -> Self {
        let activity = Arc::new(Notify::new());
        let rearm = Arc::new(Notify::new());
        let (expired_tx, expired) = watch::channel(false);

        let touched = activity.clone();
        let signed_in = rearm.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = touched.notified() => continue,
                    _ = signed_in.notified() => continue,
                    _ = tokio::time::sleep(timeout) => {
                        tracing::info!(?timeout, "idle timeout reached, signing out");
                        sessions.expire_all();
                        bus.disconnect();
                        expired_tx.send_replace(true);

                        signed_in.notified().await;
                        tracing::debug!("signed in again, idle window restarted");
                        expired_tx.send_replace(false);
                    }
                }
            }
        });

        Self {
            activity,
            rearm,
            expired,
            task,
        }
    }

    /// Record user activity, restarting the window. Ignored once expired.
    pub fn touch(&self) {
        self.activity.notify_one();
    }

    /// Open a fresh window after a sign-in, whether or not the previous one expired.
    pub fn rearm(&self) {
        self.rearm.notify_one();
    }

    /// Handle that re-arms this watcher without owning it.
    pub(crate) fn rearm_handle(&self) -> std::sync::Weak<Notify> {
        Arc::downgrade(&self.rearm)
    }

    pub fn is_expired(&self) -> bool {
        *self.expired.borrow()
    }

    /// Resolves once the current window has elapsed.
    pub async fn wait_expired(&self) {
        let mut expired = self.expired.clone();
        let _ = expired.wait_for(|done| *done).await;
    }
}

impl Drop for IdleWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
