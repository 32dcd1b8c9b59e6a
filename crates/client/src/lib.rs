//! # Referral Client
//!
//! Client runtime for the referral portal:
//! - [`EventBusClient`]: one reconnecting event connection per session, streaming with a
//!   long-poll fallback
//! - [`on_server_event`]: scoped, coalescing subscriptions
//! - [`RefreshCoordinator`] with [`FileScreen`] / [`ListScreen`]: re-fetch authoritative state
//!   when a view's topics arrive
//! - [`RestClient`]: the [`FileApi`] over HTTP
//! - [`IdleWatcher`] and [`Notifier`]
//!
//! Domain rules (stages, routes, topics) live in `referral-core`; this crate only moves data
//! and schedules re-fetches.

#![warn(rust_2018_idioms)]

pub mod api;
pub mod bus;
pub mod context;
pub mod coordinator;
pub mod idle;
pub mod notify;
pub mod rest;
pub mod screen;
pub mod sse;
pub mod subscription;
pub mod transport;

pub use api::FileApi;
pub use bus::{BusOptions, EventBusClient};
pub use context::PortalContext;
pub use coordinator::RefreshCoordinator;
pub use idle::IdleWatcher;
pub use notify::{Notifier, Toast, ToastLevel};
pub use rest::RestClient;
pub use screen::{FileScreen, FileSource, ListScreen, LoadState, Screen};
pub use subscription::{on_server_event, Subscription};
pub use transport::{Backoff, ConnectionStatus, TransportKind};
