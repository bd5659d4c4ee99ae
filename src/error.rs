//! Error types for wallet operations
//!
//! Every public operation returns a [`WalletError`] classified by where the
//! failure happened: before any network call (argument/internal), at the
//! HTTP layer, while parsing a response, or while building a transaction.

use thiserror::Error;

/// Core error type for wallet operations
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum WalletError {
    /// Malformed chain id, address, txid or other caller-supplied argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown account, missing keyring data, or a cancelled task
    #[error("Internal error: {0}")]
    Internal(String),

    /// The remote answered with a non-2xx status
    #[error("unexpected HTTP result code {0}")]
    UnexpectedHttpResult(u16),

    /// The request never produced an HTTP response
    #[error("Network error: {0}")]
    Network(String),

    /// Response body did not match the expected shape
    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Amount too small: {0}")]
    AmountTooSmall(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

impl WalletError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing(msg.into())
    }

    /// HTTP status carried by a transport error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedHttpResult(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parsing(err.to_string())
    }
}

impl From<hex::FromHexError> for WalletError {
    fn from(err: hex::FromHexError) -> Self {
        Self::Parsing(format!("invalid hex: {}", err))
    }
}
