//! Reqwest-backed client for the completion and billing endpoints
//!
//! Authentication is a session cookie per call; there is no token refresh
//! machinery. Both calls are bounded by the configured timeout so a hung
//! upstream cannot pin a worker indefinitely.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use tracing::debug;

use crate::constants::{BASE_URL, BILLING_PATH, USER_AGENT, completions_path};
use crate::error::{ProbeError, TransportError};
use crate::types::{BillingResponse, CompletionPayload};

/// Raw byte stream of an in-progress completion response body.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Outcome of a completion call that produced response headers.
///
/// A non-200 status is not a transport error — the dispatcher inspects the
/// status and body to decide whether the account should be disabled.
pub enum UpstreamReply {
    /// 200: the body is a live event stream.
    Ok(EventStream),
    /// Any other status, with the body drained for classification.
    Failed { status: u16, body: String },
}

impl fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(_) => f.debug_tuple("Ok").field(&"<event stream>").finish(),
            Self::Failed { status, body } => f
                .debug_struct("Failed")
                .field("status", status)
                .field("body", body)
                .finish(),
        }
    }
}

/// Completion transport seam.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Upstream>`), so dispatcher tests can substitute a scripted
/// transport.
pub trait Upstream: Send + Sync {
    /// Issue one completion call against the project scoped to `project_id`,
    /// authenticated by the account's session token.
    fn post_completion<'a>(
        &'a self,
        project_id: &'a str,
        session: &'a str,
        payload: CompletionPayload,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamReply, TransportError>> + Send + 'a>>;
}

/// HTTP client for the Freeplay web API.
pub struct FreeplayClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl FreeplayClient {
    /// Build a client with the given per-call timeout.
    ///
    /// The timeout covers the whole exchange including body draining, so
    /// it must leave room for the longest expected generation.
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(timeout, BASE_URL)
    }

    /// Same as [`new`](Self::new) with an overridden base URL, for tests.
    pub fn with_base_url(timeout: Duration, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build http client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Probe the billing endpoint for the remaining credit on a session.
    pub async fn fetch_balance(&self, session: &str) -> Result<f64, ProbeError> {
        let url = format!("{}{BILLING_PATH}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("accept", "application/json")
            .header("cookie", format!("session={session}"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::BadStatus(status.as_u16()));
        }

        let billing: BillingResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::Unparsed(e.to_string()))?;

        billing.remaining_credits().ok_or(ProbeError::FeatureMissing)
    }

    async fn send_completion(
        &self,
        project_id: &str,
        session: &str,
        payload: CompletionPayload,
    ) -> Result<UpstreamReply, TransportError> {
        let url = format!("{}{}", self.base_url, completions_path(project_id));
        let json_data = serde_json::to_string(&payload)
            .map_err(|e| TransportError(format!("payload serialization: {e}")))?;
        let form = reqwest::multipart::Form::new().text("json_data", json_data);

        let response = self
            .http
            .post(&url)
            .header("accept", "*/*")
            .header("origin", self.base_url.clone())
            .header("cookie", format!("session={session}"))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status();
        debug!(project_id, status = status.as_u16(), "completion response headers");

        if status.is_success() {
            let stream = response
                .bytes_stream()
                .map_err(|e| TransportError(e.to_string()));
            Ok(UpstreamReply::Ok(Box::pin(stream)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Ok(UpstreamReply::Failed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl Upstream for FreeplayClient {
    fn post_completion<'a>(
        &'a self,
        project_id: &'a str,
        session: &'a str,
        payload: CompletionPayload,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamReply, TransportError>> + Send + 'a>> {
        Box::pin(self.send_completion(project_id, session, payload))
    }
}
