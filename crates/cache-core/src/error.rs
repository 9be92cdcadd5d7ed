//! Error types shared by every cache engine and layer.

use std::time::Duration;
use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key failed validation; this is a programmer error and is never
    /// absorbed by the facade's soft-fail policy
    #[error("Invalid cache key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },

    /// No engine (or the requested engine) is available to serve the call
    #[error("Cache engine unavailable: {engine}")]
    EngineUnavailable {
        /// Engine name, or "all" when every registered engine is down
        engine: String,
    },

    /// Establishing or using a remote connection failed
    #[error("Connection to {target} failed: {message}")]
    ConnectionFailed {
        /// Remote address in `host:port` form
        target: String,
        /// Underlying failure description
        message: String,
    },

    /// The pool is at capacity and no connection became idle
    #[error("Connection pool exhausted (capacity {capacity})")]
    PoolExhausted {
        /// Configured `pool_max`
        capacity: u32,
    },

    /// An operation exceeded its configured time budget
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// Operation that was cut off
        operation: String,
        /// How long it ran before being cut off
        elapsed: Duration,
    },

    /// No healthy node of the required class remains after failover
    #[error("No healthy {role} node available")]
    NoHealthyNode {
        /// Node class that was requested (master, slave, any)
        role: String,
    },

    /// Payload could not be encoded or decoded
    #[error("Serialization failed: {message}")]
    Serialization {
        /// Underlying codec failure
        message: String,
    },

    /// A numeric operation hit an existing non-numeric value
    #[error("Value under key '{key}' is not numeric")]
    TypeMismatch {
        /// The offending key
        key: String,
    },

    /// The cluster configuration is unusable; fatal at construction
    #[error("Cluster misconfigured: {reason}")]
    ClusterMisconfigured {
        /// What was wrong with the configuration
        reason: String,
    },

    /// Filesystem-level failure in the file engine
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled after the command was dispatched; the
    /// remote side may or may not have executed it
    #[error("{operation} cancelled during dispatch")]
    CancelledDuringDispatch {
        /// Operation that was in flight
        operation: String,
    },
}

impl CacheError {
    /// Shorthand for an [`CacheError::InvalidKey`]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`CacheError::EngineUnavailable`]
    pub fn engine_unavailable(engine: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            engine: engine.into(),
        }
    }

    /// Shorthand for a [`CacheError::ConnectionFailed`]
    pub fn connection_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`CacheError::Serialization`]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether retrying the operation could plausibly succeed.
    ///
    /// The remote engine consults this before burning a retry attempt;
    /// configuration and validation errors are never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::PoolExhausted { .. }
                | Self::NoHealthyNode { .. }
        )
    }
}
