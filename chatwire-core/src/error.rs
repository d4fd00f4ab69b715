use thiserror::Error;

/// Core error type for chatwire.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChatClientError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// 401/403 from the backend. Stored credentials are cleared before this is returned.
    #[error("authentication rejected by backend (status {status})")]
    AuthRejected { status: u16 },

    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<u64> },

    /// 5xx responses carry a status; connection failures do not.
    #[error("backend unavailable")]
    BackendUnavailable { status: Option<u16> },

    #[error("backend error: {code} {message}")]
    Backend { code: String, message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatClientError {
    /// True for the errors that should send the user back to the login route.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    /// Short stable label used in logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::AuthRejected { .. } => "auth_rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Backend { .. } => "backend",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ChatClientError>;
