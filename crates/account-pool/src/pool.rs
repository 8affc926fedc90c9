//! Pool state and balance-aware account selection
//!
//! A single tokio `Mutex` guards the account list, the rotation cursor,
//! and persistence, so concurrent selections, disables, and saves cannot
//! race on the cursor or leave balances half-written. Selection-time
//! probes run while the lock is held: selection is serialized by design,
//! which also caps billing-endpoint traffic at one probe at a time.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use freeplay_client::{FreeplayClient, ProbeError};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::error::Result;
use crate::store;

/// Minimum cached credit for an account to be selectable. Slightly above
/// zero to absorb floating rounding noise in upstream billing figures.
pub const MIN_USABLE_BALANCE: f64 = 0.01;

/// Balance probe seam.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Prober>`), so pool tests can script probe outcomes.
pub trait Prober: Send + Sync {
    /// Confirm the live remaining credit for a session token.
    fn probe<'a>(
        &'a self,
        session: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<f64, ProbeError>> + Send + 'a>>;
}

impl Prober for FreeplayClient {
    fn probe<'a>(
        &'a self,
        session: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<f64, ProbeError>> + Send + 'a>> {
        Box::pin(self.fetch_balance(session))
    }
}

/// A selected account, detached from the pool's lock and ready for one
/// upstream call. The session token stays wrapped; the transport exposes
/// it at the call site.
#[derive(Debug, Clone)]
pub struct SelectedAccount {
    pub email: String,
    pub session: Secret<String>,
    pub project_id: String,
    pub balance: f64,
}

/// Operator-facing pool summary.
#[derive(Debug, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub disabled: usize,
    pub low_balance: usize,
    pub total_balance: f64,
    pub accounts: Vec<AccountSummary>,
}

/// Per-account entry in [`PoolStatus`]. Never exposes tokens.
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub email: String,
    pub project_id: String,
    pub balance: String,
    pub status: &'static str,
}

struct PoolState {
    accounts: Vec<Account>,
    cursor: usize,
}

/// Credential pool with a sticky rotation cursor.
///
/// Constructed once at startup and shared via `Arc`; torn down with a
/// final [`persist`](Self::persist) at process exit.
pub struct AccountPool {
    path: PathBuf,
    default_balance: f64,
    prober: Arc<dyn Prober>,
    state: Mutex<PoolState>,
}

impl AccountPool {
    /// Create an empty pool backed by the store at `path`.
    ///
    /// Call [`reload`](Self::reload) to populate it.
    pub fn new(path: PathBuf, default_balance: f64, prober: Arc<dyn Prober>) -> Self {
        Self {
            path,
            default_balance,
            prober,
            state: Mutex::new(PoolState {
                accounts: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Replace the in-memory sequence from the durable store.
    ///
    /// A missing store file leaves the pool empty (logged, not fatal).
    /// The cursor is kept where it was unless it falls off the new list.
    pub async fn reload(&self) -> Result<()> {
        let accounts = store::read_accounts(&self.path).await?;
        let mut state = self.state.lock().await;
        state.accounts = accounts;
        if state.cursor >= state.accounts.len() {
            state.cursor = 0;
        }
        Ok(())
    }

    /// Select a usable account.
    ///
    /// Sticky first: the account at the cursor is returned without any
    /// network probe while its cached balance clears the threshold.
    /// Otherwise scans forward around the ring, at most once per account:
    /// candidates whose cached balance is already at or below the
    /// threshold are skipped without a probe; the rest get exactly one
    /// balance refresh, and the first whose confirmed balance clears the
    /// threshold becomes the new cursor position.
    ///
    /// Returns `None` when the whole ring is exhausted — a pool-level
    /// condition, not a failure of any one account. The cursor has then
    /// wrapped back to where the scan started.
    pub async fn select_usable(&self) -> Option<SelectedAccount> {
        let mut state = self.state.lock().await;
        let len = state.accounts.len();
        if len == 0 {
            return None;
        }

        {
            let current = &state.accounts[state.cursor];
            debug!(
                email = %current.email,
                cursor = state.cursor,
                balance = current.balance,
                "checking current account"
            );
            if current.usable() {
                return Some(Self::detach(current));
            }
            info!(email = %current.email, "current account below threshold, scanning ring");
        }

        for _ in 0..len {
            state.cursor = (state.cursor + 1) % len;
            let idx = state.cursor;

            if !state.accounts[idx].usable() {
                debug!(
                    email = %state.accounts[idx].email,
                    balance = state.accounts[idx].balance,
                    "cached balance below threshold, skipping"
                );
                continue;
            }

            self.refresh_account(&mut state.accounts[idx]).await;

            let candidate = &state.accounts[idx];
            if candidate.usable() {
                info!(
                    email = %candidate.email,
                    session = %candidate.session.prefix(),
                    balance = candidate.balance,
                    "switched to account"
                );
                return Some(Self::detach(candidate));
            }
            debug!(email = %candidate.email, "confirmed balance below threshold, continuing");
        }

        warn!("pool exhausted: no account with a usable balance");
        None
    }

    /// Move the cursor one position forward, without any balance check.
    ///
    /// Used to de-prioritize an account that just failed a live call
    /// regardless of its cached balance.
    pub async fn advance(&self) {
        let mut state = self.state.lock().await;
        let len = state.accounts.len();
        if len > 0 {
            state.cursor = (state.cursor + 1) % len;
            info!(cursor = state.cursor, "advanced to next account");
        }
    }

    /// Force an account's cached balance to zero. Idempotent; a no-op for
    /// unknown sessions.
    pub async fn disable(&self, session: &str) {
        let mut state = self.state.lock().await;
        if let Some(account) = state
            .accounts
            .iter_mut()
            .find(|a| a.session.expose() == session)
        {
            let old = account.balance;
            account.balance = 0.0;
            info!(email = %account.email, old_balance = old, "account disabled");
        }
    }

    /// Probe and overwrite one account's cached balance.
    ///
    /// Returns true when the probe confirmed a balance. On any probe
    /// failure the cached balance is forced to zero: an account whose
    /// credit cannot be confirmed is unusable until an operator resets it.
    pub async fn refresh_balance(&self, session: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(idx) = state
            .accounts
            .iter()
            .position(|a| a.session.expose() == session)
        else {
            warn!("balance refresh requested for unknown session");
            return false;
        };
        self.refresh_account(&mut state.accounts[idx]).await
    }

    /// Refresh every account's balance, then persist. Returns
    /// (confirmed, failed) counts.
    pub async fn refresh_all(&self) -> (usize, usize) {
        let mut state = self.state.lock().await;
        let mut updated = 0usize;
        let mut failed = 0usize;
        for idx in 0..state.accounts.len() {
            if self.refresh_account(&mut state.accounts[idx]).await {
                updated += 1;
            } else {
                failed += 1;
            }
        }
        if let Err(e) = store::write_accounts(&self.path, &state.accounts).await {
            warn!(error = %e, "failed to persist after refreshing all balances");
        }
        (updated, failed)
    }

    /// Rewrite the durable store from the in-memory records.
    pub async fn persist(&self) -> Result<()> {
        let state = self.state.lock().await;
        store::write_accounts(&self.path, &state.accounts).await
    }

    /// Set every zero-balance account to `default` (or the configured
    /// default), leaving non-zero records untouched. Persists, and
    /// returns the number of accounts reset.
    pub async fn reset_disabled(&self, default: Option<f64>) -> usize {
        let default = default.unwrap_or(self.default_balance);
        let mut state = self.state.lock().await;
        let mut count = 0usize;
        for account in state.accounts.iter_mut().filter(|a| a.disabled()) {
            account.balance = default;
            count += 1;
            info!(email = %account.email, balance = default, "account reset");
        }
        if let Err(e) = store::write_accounts(&self.path, &state.accounts).await {
            warn!(error = %e, "failed to persist after resetting disabled accounts");
        }
        count
    }

    /// Operator summary of the pool.
    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        let accounts: Vec<AccountSummary> = state
            .accounts
            .iter()
            .map(|a| AccountSummary {
                email: a.email.clone(),
                project_id: a.project_id.clone(),
                balance: format!("{:.4}", a.balance),
                status: a.status_label(),
            })
            .collect();
        PoolStatus {
            total: state.accounts.len(),
            available: state.accounts.iter().filter(|a| a.usable()).count(),
            disabled: state.accounts.iter().filter(|a| a.disabled()).count(),
            low_balance: state
                .accounts
                .iter()
                .filter(|a| !a.usable() && !a.disabled())
                .count(),
            total_balance: state.accounts.iter().map(|a| a.balance).sum(),
            accounts,
        }
    }

    /// Number of accounts currently loaded.
    pub async fn len(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    /// Whether the pool has no accounts.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn refresh_account(&self, account: &mut Account) -> bool {
        match self.prober.probe(account.session.expose()).await {
            Ok(balance) => {
                let old = account.balance;
                account.balance = balance.max(0.0);
                info!(
                    email = %account.email,
                    old_balance = format!("{old:.4}"),
                    new_balance = format!("{:.4}", account.balance),
                    "balance refreshed"
                );
                true
            }
            Err(e) => {
                let old = account.balance;
                account.balance = 0.0;
                warn!(
                    email = %account.email,
                    old_balance = format!("{old:.4}"),
                    error = %e,
                    "balance probe failed, account disabled"
                );
                false
            }
        }
    }

    fn detach(account: &Account) -> SelectedAccount {
        SelectedAccount {
            email: account.email.clone(),
            session: account.session.clone(),
            project_id: account.project_id.clone(),
            balance: account.balance,
        }
    }

    #[cfg(test)]
    pub(crate) async fn cursor(&self) -> usize {
        self.state.lock().await.cursor
    }
}
