//! Event channel transports.
//!
//! Streaming is a single long-lived `GET /events/stream`; polling is a loop of long-poll
//! requests against `GET /events/poll`. Both hand raw topic strings to [`Connection::deliver`],
//! which closes them into [`ServerEvent`] and drops anything unknown.

use crate::sse::SseDecoder;
use api_shared::{
    auth::bearer_header,
    wire::{POLL_PATH, STREAM_PATH},
    PollRes,
};
use futures::StreamExt;
use referral_core::{ServerEvent, SessionKind};
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Streaming,
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Streaming => f.write_str("streaming"),
            TransportKind::Polling => f.write_str("polling"),
        }
    }
}

/// Observable state of the event channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected(TransportKind),
    Reconnecting {
        attempt: u32,
    },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server will not stream to us; the caller should fall back to polling.
    #[error("streaming refused: {0}")]
    Refused(String),
    #[error("event channel rejected the session token")]
    Unauthorised,
    #[error("event channel request failed: {0}")]
    Network(String),
    #[error("event channel returned {0}")]
    Http(u16),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// Everything one connection attempt needs.
#[derive(Clone)]
pub(crate) struct Connection {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) token: String,
    pub(crate) kind: SessionKind,
    pub(crate) poll_timeout: Duration,
    pub(crate) events: broadcast::Sender<ServerEvent>,
    pub(crate) status: Arc<watch::Sender<ConnectionStatus>>,
}

impl Connection {
    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// Close a raw topic into a [`ServerEvent`] and fan it out.
    pub(crate) fn deliver(&self, topic: &str) {
        match topic.parse::<ServerEvent>() {
            Ok(event) => {
                tracing::debug!(topic = event.topic(), "server event");
                // No subscribers yet is not an error.
                let _ = self.events.send(event);
            }
            Err(_) => tracing::warn!(topic, "dropping unknown event topic"),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .query(&[("client", self.kind.as_str())])
            .header(AUTHORIZATION, bearer_header(&self.token))
    }

    /// Hold a stream open until the server closes it or it fails.
    ///
    /// `established` is set once the server accepts the stream.
    ///
    /// # Errors
    /// Returns `TransportError::Refused` when the server answers with anything other than an
    /// event stream, or when the stream ends before its first byte.
    pub(crate) async fn stream(&self, established: &mut bool) -> Result<(), TransportError> {
        let res = self
            .get(STREAM_PATH)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        match res.status() {
            StatusCode::UNAUTHORIZED => return Err(TransportError::Unauthorised),
            status if !status.is_success() => {
                return Err(TransportError::Refused(format!("status {status}")))
            }
            _ => {}
        }
        let is_event_stream = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(TransportError::Refused("not an event stream".into()));
        }

        *established = true;
        self.set_status(ConnectionStatus::Connected(TransportKind::Streaming));
        tracing::info!(kind = %self.kind, "event stream connected");

        let mut decoder = SseDecoder::new();
        let mut body = res.bytes_stream();
        let mut received_any = false;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) if !received_any => {
                    return Err(TransportError::Refused(format!(
                        "stream failed before first frame: {e}"
                    )))
                }
                Err(e) => return Err(e.into()),
            };
            received_any = true;
            for frame in decoder.feed(&chunk) {
                if let Some(topic) = frame.topic() {
                    self.deliver(topic);
                }
            }
        }

        if received_any {
            Ok(())
        } else {
            Err(TransportError::Refused("stream closed before first frame".into()))
        }
    }

    /// Long-poll until a request fails.
    ///
    /// `cursor` survives reconnects so topics emitted while the connection was down are still
    /// delivered, as long as the server log retains them.
    pub(crate) async fn poll(
        &self,
        cursor: &mut Option<u64>,
        established: &mut bool,
    ) -> Result<(), TransportError> {
        loop {
            let mut req = self
                .get(POLL_PATH)
                .timeout(self.poll_timeout + Duration::from_secs(10));
            if let Some(cursor) = *cursor {
                req = req.query(&[("cursor", cursor)]);
            }

            let res = req.send().await?;
            match res.status() {
                StatusCode::UNAUTHORIZED => return Err(TransportError::Unauthorised),
                status if !status.is_success() => {
                    return Err(TransportError::Http(status.as_u16()))
                }
                _ => {}
            }
            let page: PollRes = res.json().await?;

            if !*established {
                *established = true;
                self.set_status(ConnectionStatus::Connected(TransportKind::Polling));
                tracing::info!(kind = %self.kind, cursor = page.cursor, "event polling connected");
            }
            for topic in &page.events {
                self.deliver(topic);
            }
            *cursor = Some(page.cursor);
        }
    }
}

/// Capped exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }
}
