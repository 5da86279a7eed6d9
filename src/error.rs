//! This module defines all error types used throughout the application.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding/decoding errors
    #[error("CBOR error: {0}")]
    Cbor(String),

    /// Hex decoding errors
    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Ledger snapshot errors
    #[error("Ledger snapshot error in {file:?}: {message}")]
    Snapshot { file: PathBuf, message: String },

    /// A call was rejected by the approval program or the ledger rules.
    /// The whole transaction group is discarded.
    #[error("Transaction rejected: {reason}")]
    Rejected { reason: String },

    /// A payment or asset transfer could not be applied
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The transaction was accepted into the pool but failed when its round was produced
    #[error("Pool error for transaction {txid}: {message}")]
    Pool { txid: String, message: String },

    /// The bounded confirmation wait ran out of rounds
    #[error("Transaction {txid} not confirmed after {rounds} rounds")]
    Timeout { txid: String, rounds: u64 },

    /// Signature creation or verification failure
    #[error("Signature error: {0}")]
    Signature(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid call or transaction argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown transaction id
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    /// Unknown application id
    #[error("Unknown application: {0}")]
    UnknownApplication(u64),

    /// Unknown asset id
    #[error("Unknown asset: {0}")]
    UnknownAsset(u64),

    /// Missing configuration
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a custom error with a message
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create a rejected-call error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Create a transfer failure
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if the error discarded a transaction group
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Rejected { .. } | Error::Transfer(_) | Error::Pool { .. }
        )
    }

    /// Check if error is the orchestration timeout
    pub fn is_fatal_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

// Implement From traits for common external error types

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Snapshot {
            file: PathBuf::from("unknown"),
            message: err.to_string(),
        }
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for Error {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        Error::Cbor(err.to_string())
    }
}

impl From<minicbor::decode::Error> for Error {
    fn from(err: minicbor::decode::Error) -> Self {
        Error::Cbor(err.to_string())
    }
}

impl From<secp256k1::Error> for Error {
    fn from(err: secp256k1::Error) -> Self {
        Error::Signature(err.to_string())
    }
}

// Helper macro for contract assertions

/// Ensure a condition is true or reject the call
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::error::Error::rejected(format!($($arg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::custom("test error");
        assert_eq!(err.to_string(), "test error");

        let err = Error::rejected("only the creator may delete");
        assert_eq!(
            err.to_string(),
            "Transaction rejected: only the creator may delete"
        );
    }

    #[test]
    fn test_rejection_classes() {
        assert!(Error::rejected("x").is_rejection());
        assert!(Error::transfer("receiver not opted in").is_rejection());
        assert!(!Error::custom("other").is_rejection());

        let err = Error::Timeout {
            txid: "abc".to_string(),
            rounds: 10,
        };
        assert!(err.is_fatal_timeout());
        assert_eq!(err.to_string(), "Transaction abc not confirmed after 10 rounds");
    }

    fn guarded(flag: bool) -> Result<()> {
        crate::ensure!(flag, "flag must be {}", true);
        Ok(())
    }

    #[test]
    fn test_ensure_macro_rejects() {
        assert!(guarded(true).is_ok());
        let err = guarded(false).unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
    }
}
