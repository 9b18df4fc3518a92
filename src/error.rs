//! Error type shared by every stage of the fetch/generate pipeline.
//!
//! All failures are fatal to the current generation attempt. Each one carries
//! a human-readable message and, when there is one, the underlying [`Cause`]
//! so callers can tell a timeout from a non-zero exit without parsing text.

use std::path::Path;
use std::time::Duration;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failed pipeline step.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    message: String,
    #[source]
    cause: Option<Cause>,
}

/// Underlying reason for an [`Error`].
#[derive(Debug, thiserror::Error)]
pub enum Cause {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("HTTP transfer failed: {0}")]
    Http(#[from] ureq::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("invalid wildcard pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("process failed to start: {0}")]
    Startup(std::io::Error),

    #[error("process timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("process {}", exit_text(.code))]
    Exit { code: Option<i32> },

    #[error("operation not supported on this platform: {0}")]
    Unsupported(&'static str),
}

fn exit_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("returned {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

impl Error {
    /// Failure without an underlying cause (precondition failures).
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Failure wrapping an underlying cause.
    pub fn with_cause(message: impl Into<String>, cause: impl Into<Cause>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// True when the failure came from an exceeded execution timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, Some(Cause::Timeout(_)))
    }

    /// Exit code of a compiler run that returned non-zero.
    pub fn exit_code(&self) -> Option<i32> {
        match &self.cause {
            Some(Cause::Exit { code }) => *code,
            _ => None,
        }
    }
}

/// Render a path the way every error message names it: normalized and absolute.
pub(crate) fn display_path(path: &Path) -> String {
    crate::fsutil::absolute(path).display().to_string()
}

/// Attach a message to a fallible operation, keeping its error as the cause.
pub(crate) trait ResultExt<T> {
    fn or_fail<F>(self, message: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Cause>,
{
    fn or_fail<F>(self, message: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::with_cause(message(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn message_is_display() {
        let err = Error::msg("Fail to read file: /tmp/x.ksy");
        assert_eq!(err.to_string(), "Fail to read file: /tmp/x.ksy");
        assert!(err.source().is_none());
    }

    #[test]
    fn exit_cause_is_exposed() {
        let err = Error::with_cause(
            "Fail to execute kaitai command",
            Cause::Exit { code: Some(2) },
        );
        assert_eq!(err.exit_code(), Some(2));
        assert!(!err.is_timeout());
        assert_eq!(err.source().unwrap().to_string(), "process returned 2");
    }

    #[test]
    fn timeout_cause_reports_millis() {
        let err = Error::with_cause("x", Cause::Timeout(Duration::from_millis(500)));
        assert!(err.is_timeout());
        assert_eq!(
            err.cause().unwrap().to_string(),
            "process timed out after 500ms"
        );
    }

    #[test]
    fn or_fail_wraps_io_errors() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.or_fail(|| "Fail to move".to_string()).unwrap_err();
        assert_eq!(err.message(), "Fail to move");
        assert!(matches!(err.cause(), Some(Cause::Io(_))));
    }
}
