//! Remote call failures

/// Result type for remote client calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failure reported by a [`RemoteClient`](super::RemoteClient).
///
/// `Transient` and `RateLimited` are retried; everything else is permanent
/// for the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("transient remote failure: {message}")]
    Transient { message: String },

    #[error("rate limited by remote service: {message}")]
    RateLimited { message: String },

    #[error("remote object not found: {id}")]
    NotFound { id: String },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("remote service does not support {operation}")]
    Unsupported { operation: &'static str },

    #[error("remote service rejected the request: {message}")]
    Rejected { message: String },
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
