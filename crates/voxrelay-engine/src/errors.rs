//! Engine and job-handler error types.

use thiserror::Error;

/// Errors talking to the workflow engine.
///
/// Classified so callers can tell a dead backend from a rejected request.
#[derive(Clone, Debug, Error)]
pub enum EngineError {
    /// Transport failure: connection refused, DNS, TLS, reset.
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    /// The request did not finish within the configured timeout.
    #[error("engine request timed out")]
    Timeout,
    /// The engine refused our credentials.
    #[error("authentication failed: {0}")]
    Unauthorized(String),
    /// The authorization server did not hand out a token.
    #[error("token request failed: {0}")]
    Token(String),
    /// The engine rejected the request as invalid.
    #[error("engine rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body, for diagnosis.
        body: String,
    },
    /// The addressed job or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The engine failed internally or is overloaded.
    #[error("engine error ({status}): {body}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Response body, for diagnosis.
        body: String,
    },
    /// The engine answered with something we could not decode.
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

impl EngineError {
    /// Whether trying the same request again later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout | Self::Server { .. } | Self::Token(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Timeout => "timeout",
            Self::Unauthorized(_) => "unauthorized",
            Self::Token(_) => "token",
            Self::Rejected { .. } => "rejected",
            Self::NotFound(_) => "not_found",
            Self::Server { .. } => "server_error",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            404 => Self::NotFound(body),
            408 | 504 => Self::Timeout,
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

/// Failure reported by a job handler. The job is failed back to the engine.
#[derive(Clone, Debug, Error)]
pub enum JobError {
    /// No handler is registered for the job's type.
    #[error("no handler registered for task type '{0}'")]
    UnknownTaskType(String),
    /// The job's variables could not be interpreted.
    #[error("invalid job variables: {0}")]
    InvalidVariables(String),
    /// The handler did not finish in time.
    #[error("handler timed out after {0:?}")]
    TimedOut(std::time::Duration),
    /// Any other handler failure.
    #[error("{0}")]
    Failed(String),
}
