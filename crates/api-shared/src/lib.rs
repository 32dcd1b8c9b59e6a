//! # API Shared
//!
//! Shared wire contract for the referral portal.
//!
//! Contains:
//! - The `{status, message, data}` response envelope
//! - Request bodies for file operations
//! - Event channel frames and paths
//! - Shared services like `HealthService`
//! - Bearer token helpers (usable by both server and client)
//!
//! Used by `api-rest` and `referral-client` so both ends agree on the shape of every message.

pub mod auth;
pub mod envelope;
pub mod health;
pub mod requests;
pub mod wire;

pub use envelope::{ApiStatus, Envelope};
pub use health::{HealthRes, HealthService};
pub use requests::{
    ConsentReq, CreateFileReq, EmitEventReq, OutcomeReq, PaymentReq, RejectReq, StagePayload,
};
pub use wire::{ClientQuery, PollQuery, PollRes};
