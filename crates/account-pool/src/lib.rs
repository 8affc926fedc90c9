//! Credential pool for Freeplay accounts
//!
//! Manages an ordered set of session-cookie accounts with balance-aware
//! sticky selection, failure-driven disabling, and a durable line store.
//! The pool holds a single rotation cursor: the current account is reused
//! while its cached credit stays above the usability threshold, and a ring
//! scan with live balance probes runs only when it drops below.
//!
//! Account lifecycle:
//! 1. Loaded from the line store in file order at startup
//! 2. Selected sticky-first, probed on cursor misses
//! 3. Disabled (balance forced to 0) on auth failures or failed probes
//! 4. Balance refreshed after each billed completion, then persisted
//! 5. Re-enabled only by an operator reset
//!
//! Records are never deleted at runtime; the whole set is rewritten to the
//! store after every mutation.

pub mod account;
pub mod error;
pub mod pool;
pub mod store;

pub use account::Account;
pub use error::{Error, Result};
pub use pool::{AccountPool, AccountSummary, MIN_USABLE_BALANCE, PoolStatus, Prober, SelectedAccount};
