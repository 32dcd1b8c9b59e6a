//! Event channel wire format.
//!
//! Two transports share one authentication scheme and one topic vocabulary:
//! - streaming: `GET /events/stream`, `text/event-stream`, the `event:` field carries the topic
//! - polling: `GET /events/poll?cursor=N`, long-poll returning [`PollRes`]
//!
//! Topics travel as plain strings. The client closes them into `ServerEvent` and drops the ones
//! it does not know.

use referral_core::SessionKind;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const STREAM_PATH: &str = "/events/stream";
pub const POLL_PATH: &str = "/events/poll";
pub const EMIT_PATH: &str = "/events";

/// Comment line the server sends to keep idle streams open.
pub const HEARTBEAT: &str = "heartbeat";

/// Which session the connection belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientQuery {
    pub client: SessionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollQuery {
    pub client: SessionKind,
    /// Last cursor the client has seen. Absent on the first poll.
    #[serde(default)]
    pub cursor: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PollRes {
    /// Cursor to send with the next poll.
    pub cursor: u64,
    /// Topics emitted after the requested cursor, oldest first.
    pub events: Vec<String>,
}
