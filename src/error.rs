//! Error types for the swap lifecycle engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a swap through its lifecycle.
///
/// Background tasks (the reconciliation loop's tick and event handlers) never surface
/// these to a caller; they log and retry on the next tick instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument from the caller: bad address, amount out of bounds, invalid
    /// secret. Never retried.
    #[error("invalid request: {0}")]
    UserError(String),

    /// The intermediary (LP) returned data that is inconsistent or adversarial.
    ///
    /// `recoverable = true` means try the next candidate LP without penalizing this
    /// one; `recoverable = false` means blacklist it.
    #[error("intermediary error ({}): {message}", if *.recoverable { "recoverable" } else { "non-recoverable" })]
    IntermediaryError { message: String, recoverable: bool },

    /// Transport-level failure talking to an LP.
    #[error("request failed with status {http_code}: {message}")]
    RequestError { http_code: u16, message: String },

    /// A requested amount fell outside the bounds an LP (or the registry aggregate)
    /// advertises.
    #[error("amount out of bounds: must be between {min} and {max}")]
    OutOfBoundsError { min: u64, max: u64 },

    /// A chain-level cryptographic signature failed to verify.
    #[error("signature verification failed: {0}")]
    SignatureVerificationError(String),

    /// Swap data returned by an LP contradicts what was requested.
    #[error("swap data verification failed: {0}")]
    SwapDataVerificationError(String),

    /// Durable store failure. The swap is quarantined and the failure is surfaced
    /// rather than retried automatically.
    #[error("store error: {0}")]
    StoreError(String),

    /// A broadcast chain transaction reverted or was never mined within its window.
    #[error("transaction reverted: {0}")]
    TransactionRevertedError(String),

    /// The operation was cancelled cooperatively. Never changes persisted state.
    #[error("operation cancelled")]
    CancellationError,

    /// The suspension point's deadline elapsed before completion.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No mnemonic found in storage.
    #[error("no mnemonic found in storage; generate or import one first")]
    NoMnemonic,

    /// Invalid mnemonic phrase.
    #[error("invalid mnemonic phrase: {0}")]
    InvalidMnemonic(String),

    /// Swap not found in storage.
    #[error("swap not found: {0}")]
    SwapNotFound(String),

    /// Parse error (addresses, invoices, LNURLs, ...).
    #[error("parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Bitcoin-related error.
    #[error("bitcoin error: {0}")]
    Bitcoin(String),

    /// Key derivation error.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// Network/HTTP transport error not tied to a specific LP response.
    #[error("network error: {0}")]
    Network(String),

    /// Generic error with context, used at the chain-adapter boundary.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry policy should retry this error class at all.
    ///
    /// `UserError`, `SignatureVerificationError`, `SwapDataVerificationError`,
    /// `CancellationError` and non-recoverable `IntermediaryError` are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UserError(_) => false,
            Error::IntermediaryError { recoverable, .. } => *recoverable,
            Error::SignatureVerificationError(_) => false,
            Error::SwapDataVerificationError(_) => false,
            Error::CancellationError => false,
            Error::OutOfBoundsError { .. } => false,
            Error::RequestError { http_code, .. } => {
                !(400..500).contains(http_code) || *http_code == 429
            }
            _ => true,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}
