//! Error types for upstream calls

use thiserror::Error;

/// Failure modes of a balance probe.
///
/// `FeatureMissing` is deliberately distinct from a confirmed zero balance:
/// a billing payload without the credit feature is an ambiguous state, and
/// the pool treats it as "could not confirm" rather than "empty".
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("billing request failed: {0}")]
    Transport(String),

    #[error("billing endpoint returned status {0}")]
    BadStatus(u16),

    #[error("billing payload could not be parsed: {0}")]
    Unparsed(String),

    #[error("credit feature absent from billing payload")]
    FeatureMissing,
}

/// A network-level failure during a completion call (connect error,
/// timeout, broken stream). Says nothing about the account's credit.
#[derive(Debug, Error)]
#[error("completion request failed: {0}")]
pub struct TransportError(pub String);
