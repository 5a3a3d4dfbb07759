use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Run {run_id} already has values for {key}")]
    AlreadyBound { run_id: u64, key: String },

    #[error("Malformed store: {0}")]
    Malformed(String),

    /// Referential integrity is broken: bindings and physical rows disagree.
    /// Never retried by callers, this indicates corruption.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Digest error: {0}")]
    Digest(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Errors caused by the caller's request rather than by the store.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::NotFound(_)
                | Self::PreconditionFailed(_)
                | Self::AlreadyBound { .. }
                | Self::Malformed(_)
        )
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<std::fmt::Error> for DbError {
    fn from(err: std::fmt::Error) -> Self {
        Self::Digest(format!("digest stream write failed: {}", err))
    }
}
