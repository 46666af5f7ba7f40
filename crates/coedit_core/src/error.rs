use thiserror::Error;

/// Unified error type for coedit operations
#[derive(Debug, Error)]
pub enum CoeditError {
    /// A CRDT payload could not be decoded or applied.
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// A storage backend failed to persist or load sync state.
    #[error("storage error: {0}")]
    Storage(String),

    /// A record or block could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for coedit operations
pub type Result<T> = std::result::Result<T, CoeditError>;
