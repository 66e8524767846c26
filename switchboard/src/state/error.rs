/// Errors from shared state reads and mutations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The key is not cached. Expected and recoverable.
    #[error("shared state cache not found")]
    NotFound,

    /// The backing store could not be reached. Callers may retry.
    #[error("shared state store unavailable: {0}")]
    Unavailable(String),

    /// The resolved entity belongs to a different guild than the caller asked for.
    #[error("entity belongs to a different guild")]
    WrongServer,

    /// The resolved entity is not of the kind the caller asked for.
    #[error("entity has the wrong type")]
    WrongType,

    /// A cached record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store rejected a command.
    #[error("store error: {0}")]
    Store(String),

    /// The upstream REST API failed.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl StateError {
    /// Cache misses and caller-asserted mismatches. These are routinely
    /// excluded from alerting.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            StateError::NotFound | StateError::WrongServer | StateError::WrongType
        )
    }

    /// Failures worth retrying from a background task.
    pub fn is_transient(&self) -> bool {
        matches!(self, StateError::Unavailable(_) | StateError::Upstream(_))
    }
}

/// Result alias for shared state operations.
pub type StateResult<T> = Result<T, StateError>;
