//! Unified error type for the CoJSON engine.
//!
//! One flat enum rather than a per-module hierarchy, following the "single
//! source of truth for failure modes" shape used across the rest of the
//! engine's crates.

use serde::{Deserialize, Serialize};

/// Unified error type for all CoJSON core operations.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum CoJsonError {
    /// A session's trailing signature failed to verify.
    #[error("signature invalid: {message}")]
    SignatureInvalid {
        /// What was being verified.
        message: String,
    },

    /// A transaction's index did not extend the chain, or the chain hash
    /// did not match.
    #[error("chain broken: {message}")]
    ChainBroken {
        /// Details of the break.
        message: String,
    },

    /// A header or referenced group is not yet known locally.
    #[error("unknown dependency: {message}")]
    UnknownDependency {
        /// The missing CoValue ID, as text.
        message: String,
    },

    /// The signer's effective role was insufficient at the transaction's
    /// causal position.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Details of the denial.
        message: String,
    },

    /// A private transaction's key epoch has not been sealed to this reader.
    #[error("key unavailable: {message}")]
    KeyUnavailable {
        /// Which epoch was missing.
        message: String,
    },

    /// A cryptographic operation (decrypt, verify, seal, unseal) failed.
    #[error("crypto error: {message}")]
    Crypto {
        /// Details of the cryptographic failure.
        message: String,
    },

    /// The storage backend failed to persist a write.
    #[error("storage error: {message}")]
    Storage {
        /// Details of the storage failure.
        message: String,
    },

    /// Input was malformed or internally inconsistent.
    #[error("invalid: {message}")]
    Invalid {
        /// Details of the invalid input.
        message: String,
    },

    /// A referenced resource (CoValue, session, transaction) does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Details of what was not found.
        message: String,
    },
}

impl CoJsonError {
    pub fn signature_invalid(message: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            message: message.into(),
        }
    }

    pub fn chain_broken(message: impl Into<String>) -> Self {
        Self::ChainBroken {
            message: message.into(),
        }
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self::UnknownDependency {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn key_unavailable(message: impl Into<String>) -> Self {
        Self::KeyUnavailable {
            message: message.into(),
        }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, CoJsonError>;
