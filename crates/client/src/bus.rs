//! Event Bus Client.
//!
//! One connection per authenticated session. The client negotiates a transport (streaming
//! first, long-polling when streaming is refused), reconnects with capped exponential backoff
//! and republishes every known topic on a broadcast channel. Failures are logged and never
//! surfaced to the user.

use crate::transport::{Backoff, Connection, ConnectionStatus, TransportError};
use referral_core::{CoreConfig, ServerEvent, Session, SessionKind, SessionStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct BusOptions {
    pub backoff: Backoff,
    /// Server-side long-poll window; the request timeout is derived from it.
    pub poll_timeout: Duration,
    /// Skip the streaming attempt entirely.
    pub polling_only: bool,
    pub buffer: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            poll_timeout: Duration::from_secs(25),
            polling_only: false,
            buffer: referral_core::constants::DEFAULT_EVENT_BUFFER,
        }
    }
}

struct ActiveConnection {
    kind: SessionKind,
    token: String,
    task: JoinHandle<()>,
}

struct BusInner {
    http: reqwest::Client,
    base_url: String,
    options: BusOptions,
    events: broadcast::Sender<ServerEvent>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    active: Mutex<Option<ActiveConnection>>,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = active.take() {
            conn.task.abort();
        }
    }
}

/// Shared handle to the process-wide event connection.
#[derive(Clone)]
pub struct EventBusClient {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBusClient")
            .field("base_url", &self.inner.base_url)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl EventBusClient {
    /// Bus against the configured events base URL.
    pub fn new(config: &CoreConfig) -> Self {
        let options = BusOptions {
            buffer: config.event_buffer(),
            ..BusOptions::default()
        };
        Self::with_options(config.events_base_url(), options)
    }

    pub fn with_options(base_url: impl Into<String>, options: BusOptions) -> Self {
        let (events, _) = broadcast::channel(options.buffer.max(1));
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(BusInner {
                http: reqwest::Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                options,
                events,
                status: Arc::new(status),
                active: Mutex::new(None),
            }),
        }
    }

    /// Open the channel for `session`.
    ///
    /// Calling again with the same session is a no-op; a different session replaces the
    /// current connection. Must be called from within a tokio runtime.
    pub fn connect(&self, session: &Session) {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.as_ref() {
            if current.kind == session.kind
                && current.token == session.refresh_token
                && !current.task.is_finished()
            {
                return;
            }
        }
        if let Some(previous) = active.take() {
            previous.task.abort();
            tracing::info!(kind = %previous.kind, "replacing event connection");
        }

        let connection = Connection {
            http: self.inner.http.clone(),
            base_url: self.inner.base_url.clone(),
            token: session.refresh_token.clone(),
            kind: session.kind,
            poll_timeout: self.inner.options.poll_timeout,
            events: self.inner.events.clone(),
            status: self.inner.status.clone(),
        };
        let options = self.inner.options.clone();
        self.inner.status.send_replace(ConnectionStatus::Connecting);
        tracing::info!(kind = %session.kind, user = %session.identity.id, "opening event connection");

        *active = Some(ActiveConnection {
            kind: session.kind,
            token: session.refresh_token.clone(),
            task: tokio::spawn(run(connection, options)),
        });
    }

    /// Connect for whichever session owns the channel, or disconnect when nobody is signed in.
    ///
    /// Returns `true` when a session was available.
    pub fn sync_with(&self, sessions: &SessionStore) -> bool {
        match sessions.snapshot().event_session() {
            Some(session) => {
                self.connect(session);
                true
            }
            None => {
                self.disconnect();
                false
            }
        }
    }

    /// Tear the connection down. Subscriptions stay registered and resume on the next connect.
    pub fn disconnect(&self) {
        let previous = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(previous) = previous {
            previous.task.abort();
            tracing::info!(kind = %previous.kind, "event connection closed");
        }
        self.inner.status.send_replace(ConnectionStatus::Disconnected);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected()
    }

    /// Publish `event` locally as if it had arrived on the channel.
    pub fn inject(&self, event: ServerEvent) {
        let _ = self.inner.events.send(event);
    }
}

async fn run(connection: Connection, options: BusOptions) {
    let mut streaming = !options.polling_only;
    let mut cursor = None;
    let mut attempt: u32 = 0;

    loop {
        connection.set_status(if attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting { attempt }
        });

        let mut established = false;
        let result = if streaming {
            connection.stream(&mut established).await
        } else {
            connection.poll(&mut cursor, &mut established).await
        };

        match result {
            Ok(()) => tracing::info!("event stream closed by server"),
            Err(TransportError::Refused(reason)) if streaming => {
                tracing::info!(%reason, "falling back to long-polling");
                streaming = false;
                continue;
            }
            Err(TransportError::Unauthorised) => {
                // A rejected credential stays rejected until the session changes.
                tracing::warn!(kind = %connection.kind, "event credential rejected, closing channel");
                connection.set_status(ConnectionStatus::Disconnected);
                return;
            }
            Err(e) => tracing::warn!(error = %e, streaming, "event connection failed"),
        }

        if established {
            attempt = 0;
        }
        attempt = attempt.saturating_add(1);
        let delay = options.backoff.delay(attempt);
        connection.set_status(ConnectionStatus::Reconnecting { attempt });
        tracing::debug!(attempt, ?delay, "reconnecting event channel");
        tokio::time::sleep(delay).await;
    }
}
