//! Completion dispatch with bounded account failover
//!
//! One dispatch makes at most as many attempts as the pool has accounts.
//! Each attempt is classified explicitly: a transport failure advances the
//! cursor and retries, an auth-shaped rejection disables the account and
//! persists, and any other rejection retries with the account untouched.
//! Model resolution happens before the first attempt so an unknown model
//! costs zero network calls.

use std::sync::Arc;

use account_pool::{AccountPool, SelectedAccount};
use freeplay_client::{ChatMessage, CompletionPayload, EventStream, Upstream, UpstreamReply};
use tracing::{info, warn};

use crate::metrics;
use crate::models::{self, ModelEntry};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("model '{0}' is not supported; supported models: {1}")]
    UnknownModel(String, String),

    #[error("no account with a usable balance is available")]
    NoAccountsAvailable,

    #[error("all accounts failed to serve the completion ({0} attempts)")]
    AllAccountsFailed(usize),
}

/// How the dispatcher reacts to a non-200 upstream reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Credentials or project path are bad; the account is dead weight
    /// until an operator intervenes.
    DisableAccount,
    /// Transient or unclassified; leave the account's balance alone.
    TryNext,
}

/// Classify a completion rejection by status and body.
///
/// 401 and 404 mean the session or project no longer resolves; the
/// upstream also reports a deleted project as a 200-family routing error
/// with "Path Not Found" in the body, so the body text is checked at any
/// status.
pub fn classify_rejection(status: u16, body: &str) -> Rejection {
    if status == 401 || status == 404 || body.contains("Path Not Found") {
        Rejection::DisableAccount
    } else {
        Rejection::TryNext
    }
}

/// A successfully opened completion, ready for translation.
pub struct Dispatched {
    pub stream: EventStream,
    pub account: SelectedAccount,
    pub model: &'static ModelEntry,
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("account", &self.account)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Per-attempt outcome, separating the decision from the side effects
/// applied by the dispatch loop.
enum Attempt {
    Completed(EventStream),
    TransportFailed(String),
    Rejected { status: u16, body: String },
}

pub struct Dispatcher {
    pool: Arc<AccountPool>,
    upstream: Arc<dyn Upstream>,
}

impl Dispatcher {
    pub fn new(pool: Arc<AccountPool>, upstream: Arc<dyn Upstream>) -> Self {
        Self { pool, upstream }
    }

    /// Open a completion stream, failing over across the pool.
    pub async fn dispatch(
        &self,
        messages: &[ChatMessage],
        model_name: &str,
    ) -> Result<Dispatched, DispatchError> {
        let model = models::resolve(model_name).ok_or_else(|| {
            DispatchError::UnknownModel(model_name.to_string(), models::supported_names())
        })?;

        let max_attempts = self.pool.len().await;
        if max_attempts == 0 {
            return Err(DispatchError::NoAccountsAvailable);
        }

        for attempt in 1..=max_attempts {
            let Some(account) = self.pool.select_usable().await else {
                return Err(DispatchError::NoAccountsAvailable);
            };
            info!(
                email = %account.email,
                model = model_name,
                attempt,
                max_attempts,
                "dispatching completion"
            );

            match self.try_account(&account, messages, model).await {
                Attempt::Completed(stream) => {
                    return Ok(Dispatched {
                        stream,
                        account,
                        model,
                    });
                }
                Attempt::TransportFailed(error) => {
                    warn!(email = %account.email, error, "transport failure, advancing to next account");
                    metrics::record_dispatch_retry("transport");
                    self.pool.advance().await;
                }
                Attempt::Rejected { status, body } => {
                    match classify_rejection(status, &body) {
                        Rejection::DisableAccount => {
                            warn!(email = %account.email, status, "completion rejected, disabling account");
                            metrics::record_account_disabled();
                            metrics::record_dispatch_retry("disabled");
                            self.pool.disable(account.session.expose()).await;
                            if let Err(e) = self.pool.persist().await {
                                warn!(error = %e, "failed to persist after disabling account");
                            }
                        }
                        Rejection::TryNext => {
                            warn!(email = %account.email, status, "completion rejected, retrying");
                            metrics::record_dispatch_retry("rejected");
                        }
                    }
                }
            }
        }

        Err(DispatchError::AllAccountsFailed(max_attempts))
    }

    async fn try_account(
        &self,
        account: &SelectedAccount,
        messages: &[ChatMessage],
        model: &ModelEntry,
    ) -> Attempt {
        let payload = CompletionPayload::new(messages.to_vec(), model.upstream_id, model.max_tokens);
        match self
            .upstream
            .post_completion(&account.project_id, account.session.expose(), payload)
            .await
        {
            Ok(UpstreamReply::Ok(stream)) => Attempt::Completed(stream),
            Ok(UpstreamReply::Failed { status, body }) => Attempt::Rejected { status, body },
            Err(e) => Attempt::TransportFailed(e.to_string()),
        }
    }
}
