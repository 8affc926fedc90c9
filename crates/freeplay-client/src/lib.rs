//! HTTP client for the Freeplay private web API
//!
//! Two upstream interactions live here:
//! 1. Completion calls — POST a prompt against a project-scoped endpoint,
//!    returning a server-sent-event stream of generation events.
//! 2. Balance probes — GET the billing endpoint and extract the remaining
//!    credit for an account's session.
//!
//! The completion path is exposed through the dyn-compatible [`Upstream`]
//! trait so the dispatcher can be exercised against a scripted transport
//! in tests.

pub mod client;
pub mod constants;
pub mod error;
pub mod types;

pub use client::{EventStream, FreeplayClient, Upstream, UpstreamReply};
pub use error::{ProbeError, TransportError};
pub use types::{BillingResponse, ChatMessage, CompletionPayload, StreamEvent, parse_data_line};
