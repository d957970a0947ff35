use thiserror::Error;

/// Main error type for AXON operations
///
/// One flat enum covering every failure mode a caller can observe. Local
/// invariant violations (vector-clock math, CRDT merges, shard math) bubble
/// up as `Internal` and must never lose state; transport failures carry the
/// target so callers can decay that node's reliability.
#[derive(Error, Debug)]
pub enum AxonError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("forbidden: role '{role}' may not {operation} in namespace '{namespace}'")]
    Forbidden {
        role: String,
        operation: String,
        namespace: String,
    },

    #[error("not found: {key}")]
    NotFound { key: String },

    #[error("backpressure: pending queue at capacity ({capacity})")]
    Backpressure { capacity: usize },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed vector clock: {reason}")]
    MalformedClock { reason: String },

    #[error("corrupt blob: expected checksum {expected}, got {actual}")]
    CorruptBlob { expected: String, actual: String },

    #[error("invalid delta {delta_id}: {reason}")]
    InvalidDelta { delta_id: String, reason: String },

    #[error("unknown compression algorithm tag: {tag}")]
    UnknownAlgorithm { tag: u8 },

    #[error("quorum unavailable: {active}/{total} nodes active, need {required}")]
    QuorumUnavailable {
        active: usize,
        total: usize,
        required: usize,
    },

    #[error("shard not found: {shard_id}")]
    ShardMissing { shard_id: String },

    #[error("migration {migration_id} failed: {reason}")]
    MigrationFailed {
        migration_id: String,
        reason: String,
    },

    #[error("conflict on key '{key}' requires manual review")]
    ConflictNeedsReview { key: String },

    #[error("transport error sending to {target}: {reason}")]
    TransportError { target: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AxonError {
    /// Shorthand for internal invariant failures
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Shorthand for configuration validation failures
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether a retry can ever succeed for this error
    ///
    /// `Forbidden` is never retried; transport and timeout errors are
    /// retried with backoff by the gossip layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AxonError::TransportError { .. } | AxonError::Timeout { .. } | AxonError::Backpressure { .. }
        )
    }
}

impl From<serde_json::Error> for AxonError {
    fn from(err: serde_json::Error) -> Self {
        AxonError::Internal(format!("json serialization: {}", err))
    }
}

/// Convenient Result type for AXON operations
pub type AxonResult<T> = Result<T, AxonError>;
