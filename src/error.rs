// src/error.rs
// Centralized error type for the upstream integration core.
//
// Mirrors the teacher's `git/error.rs`: a thiserror-derived enum, `impl`
// constructors per variant, and an extension trait for wrapping foreign
// errors with context.

use thiserror::Error;

/// The five error kinds from the error-handling design, plus the
/// recoverable-frame-decode kind that stays internal to the frame decoder.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("auth failure: {message}")]
    AuthFailure { message: String, retryable: bool },

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus {
        status: u16,
        body: String,
    },

    #[error("request/response format conversion failed: {0}")]
    FormatConversion(String),

    #[error("client cancelled the request")]
    ClientCancelled,

    #[error("frame decode error: {0}")]
    ParseRecoverable(String),
}

impl CoreError {
    /// An auth failure the caller may retry (e.g. at a layer above the
    /// adapter's own one-shot 401 retry): initial token fetch, or refresh
    /// after a 401.
    pub fn auth_failure(msg: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: msg.into(),
            retryable: true,
        }
    }

    /// An auth failure that retrying won't fix: two consecutive 401s, or a
    /// permanent configuration problem.
    pub fn auth_failure_terminal(msg: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: msg.into(),
            retryable: false,
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::UpstreamTransport(msg.into())
    }

    pub fn upstream_status(status: u16, body: impl Into<String>) -> Self {
        Self::UpstreamStatus {
            status,
            body: body.into(),
        }
    }

    pub fn format_conversion(msg: impl Into<String>) -> Self {
        Self::FormatConversion(msg.into())
    }

    pub fn parse_recoverable(msg: impl Into<String>) -> Self {
        Self::ParseRecoverable(msg.into())
    }

    /// Whether the enclosing executor should retry this request.
    ///
    /// `AuthFailure` varies by cause: a failure fetching or refreshing the
    /// token is retryable, but two consecutive 401s from upstream mean the
    /// credentials themselves are bad, which a retry won't fix.
    pub fn retryable(&self) -> bool {
        match self {
            CoreError::AuthFailure { retryable, .. } => *retryable,
            CoreError::UpstreamTransport(_) => true,
            CoreError::UpstreamStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            CoreError::FormatConversion(_) => false,
            CoreError::ClientCancelled => false,
            CoreError::ParseRecoverable(_) => false,
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, CoreError::UpstreamStatus { status, .. } if (500..600).contains(status))
    }
}

/// Result type alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Extension trait for wrapping foreign errors (JSON, UTF-8, join errors...)
/// into a `CoreError::FormatConversion` with added context, the way the
/// teacher's `IntoGitErrorResult` wraps foreign errors into `GitError`.
pub trait IntoCoreErrorResult<T> {
    fn into_core_error(self, context: &str) -> CoreResult<T>;
}

impl<T, E: std::fmt::Display> IntoCoreErrorResult<T> for Result<T, E> {
    fn into_core_error(self, context: &str) -> CoreResult<T> {
        self.map_err(|e| CoreError::FormatConversion(format!("{context}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_error_design() {
        assert!(CoreError::auth_failure("failed to get access token").retryable());
        assert!(!CoreError::auth_failure_terminal("two 401s").retryable());
        assert!(CoreError::transport("connect reset").retryable());
        assert!(CoreError::upstream_status(429, "").retryable());
        assert!(CoreError::upstream_status(500, "").retryable());
        assert!(!CoreError::upstream_status(400, "").retryable());
        assert!(!CoreError::format_conversion("bad model").retryable());
        assert!(!CoreError::ClientCancelled.retryable());
    }

    #[test]
    fn is_server_error_only_5xx() {
        assert!(CoreError::upstream_status(503, "").is_server_error());
        assert!(!CoreError::upstream_status(429, "").is_server_error());
        assert!(!CoreError::upstream_status(200, "").is_server_error());
    }

    #[test]
    fn into_core_error_adds_context() {
        let parsed: Result<i32, _> = "nope".parse::<i32>();
        let wrapped = parsed.into_core_error("parsing count");
        assert!(matches!(wrapped, Err(CoreError::FormatConversion(_))));
    }
}
