use thiserror::Error;

/// Errors surfaced by a tab's task loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to parse action: {0}")]
    Parse(#[from] ParseError),

    /// Page extraction failed; fatal for the current task.
    #[error("page extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    RemoteService(#[from] RemoteServiceError),

    #[error("action execution failed: {0}")]
    ActionExecution(String),

    /// Parsed cleanly but names no known action kind.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("failed to attach automation hook: {0}")]
    Attach(String),

    /// The model ended the task with `fail()`.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl AgentError {
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::ActionExecution(message.into())
    }
}

/// Typed cause returned by the action parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty action text")]
    Empty,

    #[error("malformed action `{text}`: {cause}")]
    Malformed { text: String, cause: String },

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("`{action}` expects {expected} argument(s), got {found}")]
    Arity {
        action: String,
        expected: String,
        found: usize,
    },

    #[error("`{action}` argument `{param}` must be {expected}, got `{found}`")]
    ArgumentType {
        action: String,
        param: String,
        expected: String,
        found: String,
    },
}

impl ParseError {
    pub fn malformed(text: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Malformed {
            text: text.into(),
            cause: cause.into(),
        }
    }
}

/// Failure talking to the remote reasoning service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteServiceError {
    #[error("reasoning service rate limited the request: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("reasoning service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("reasoning service unreachable: {0}")]
    Transport(String),

    #[error("invalid reasoning response: {0}")]
    InvalidResponse(String),
}

impl RemoteServiceError {
    /// Rate limits are resumable; everything else ends the task.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            RemoteServiceError::RateLimited { .. } => true,
            RemoteServiceError::Http { status: 429, .. } => true,
            RemoteServiceError::Http { message, .. } | RemoteServiceError::Transport(message) => {
                has_rate_limit_signature(message)
            }
            RemoteServiceError::InvalidResponse(_) => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RemoteServiceError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

fn has_rate_limit_signature(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("429")
        || lowered.contains("rate limit")
        || lowered.contains("rate_limit")
        || lowered.contains("too many requests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection_covers_status_and_message() {
        assert!(RemoteServiceError::Http {
            status: 429,
            message: String::new()
        }
        .is_rate_limited());
        assert!(RemoteServiceError::Transport("upstream: Too Many Requests".into()).is_rate_limited());
        assert!(!RemoteServiceError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_rate_limited());
        assert!(!RemoteServiceError::InvalidResponse("rate limit".into()).is_rate_limited());
    }
}
