//! Error types for gitsync
//!
//! Every operation returns either success or one of these typed failures.
//! Lower-layer libgit2 errors are classified on the way in so callers can
//! match on the category instead of parsing messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for gitsync operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Lookup Errors
    // ==========================================================================
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Invalid {kind} '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    // ==========================================================================
    // Network Errors
    // ==========================================================================
    #[error("Authentication failed for '{url}'")]
    AuthenticationFailed { url: String },

    #[error("Transport failure: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<git2::Error>,
    },

    #[error("Push of '{refname}' rejected: {reason}")]
    PushRejected { refname: String, reason: String },

    // ==========================================================================
    // Merge / Working Tree Errors
    // ==========================================================================
    #[error("Merge conflict in {} path(s): {}", .paths.len(), .paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    #[error("Uncommitted changes in {} path(s): {}", .paths.len(), .paths.join(", "))]
    DirtyWorktree { paths: Vec<String> },

    #[error("Repository has a {state} in progress")]
    OperationInProgress { state: String },

    #[error("Checkout of '{branch}' would overwrite local changes: {source}")]
    CheckoutConflict {
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("Working tree switched to '{branch}' but HEAD could not be updated: {source}")]
    HeadDiverged {
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("Repository is corrupt: {message}")]
    Corrupt { message: String },

    // ==========================================================================
    // Configuration / IO Errors
    // ==========================================================================
    #[error("Invalid config '{path}': {message}")]
    Config { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==========================================================================
    // Catch-all
    // ==========================================================================
    #[error("Git operation failed: {message}")]
    Git {
        message: String,
        #[source]
        source: Option<git2::Error>,
    },
}

/// Placeholder for failures raised without the remote URL in scope
pub const UNKNOWN_URL: &str = "<unknown url>";

/// Result type alias for gitsync operations
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};

        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) | (ErrorCode::User, ErrorClass::Callback) => {
                tracing::debug!(error = %err, "authentication rejected");
                Error::AuthenticationFailed {
                    url: UNKNOWN_URL.to_string(),
                }
            }
            (ErrorCode::NotFound, _) => Error::NotFound {
                kind: "object",
                name: err.message().to_string(),
            },
            (ErrorCode::Exists, _) => Error::AlreadyExists {
                kind: "object",
                name: err.message().to_string(),
            },
            (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl) => {
                Error::Transport {
                    message: err.message().to_string(),
                    source: Some(err),
                }
            }
            _ => Error::Git {
                message: err.message().to_string(),
                source: Some(err),
            },
        }
    }
}

impl Error {
    /// Classify a git2 error raised while looking up a named object.
    ///
    /// `NotFound`/`Exists` codes carry the caller's name instead of the raw
    /// libgit2 message; everything else goes through `From<git2::Error>`.
    pub(crate) fn from_git2(err: git2::Error, kind: &'static str, name: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => Error::NotFound {
                kind,
                name: name.to_string(),
            },
            git2::ErrorCode::Exists => Error::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            _ => err.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::Corrupt {
            message: message.into(),
        }
    }

    /// Returns a user-friendly suggestion for fixing the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::AuthenticationFailed { .. } => {
                Some("Check the username and secret; credentials are offered only once per operation")
            }
            Error::MergeConflict { .. } => {
                Some("The merge was rolled back; reconcile the listed paths locally and pull again")
            }
            Error::DirtyWorktree { .. } => Some("Commit or discard local changes before pulling"),
            Error::OperationInProgress { .. } => {
                Some("Finish or abort the pending operation (e.g. `git merge --abort`) before retrying")
            }
            Error::HeadDiverged { .. } => {
                Some("Point HEAD at the checked-out branch manually (`git symbolic-ref HEAD refs/heads/<branch>`)")
            }
            Error::CheckoutConflict { .. } => Some("Commit or discard local changes before switching"),
            Error::PushRejected { .. } => Some("Pull the remote branch first, then push again"),
            _ => None,
        }
    }

    /// Returns true if the repository is left in its pre-call state
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::HeadDiverged { .. } | Error::Corrupt { .. } | Error::OperationInProgress { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{ErrorClass, ErrorCode};

    #[test]
    fn test_error_display() {
        let err = Error::NotFound {
            kind: "branch",
            name: "feature".to_string(),
        };
        assert_eq!(err.to_string(), "branch 'feature' not found");

        let err = Error::MergeConflict {
            paths: vec!["a.txt".into(), "b.txt".into()],
        };
        assert_eq!(err.to_string(), "Merge conflict in 2 path(s): a.txt, b.txt");
    }

    #[test]
    fn test_classify_git2_errors() {
        let auth = git2::Error::new(ErrorCode::Auth, ErrorClass::Http, "denied");
        assert!(matches!(Error::from(auth), Error::AuthenticationFailed { .. }));

        let aborted = git2::Error::new(ErrorCode::User, ErrorClass::Callback, "aborted");
        let err = Error::from(aborted);
        assert!(matches!(err, Error::AuthenticationFailed { .. }));
        assert_eq!(err.to_string(), "Authentication failed for '<unknown url>'");

        let net = git2::Error::new(ErrorCode::GenericError, ErrorClass::Net, "reset by peer");
        assert!(matches!(Error::from(net), Error::Transport { .. }));

        let other = git2::Error::new(ErrorCode::GenericError, ErrorClass::Index, "bad index");
        assert!(matches!(Error::from(other), Error::Git { .. }));
    }

    #[test]
    fn test_from_git2_uses_context() {
        let err = git2::Error::new(ErrorCode::NotFound, ErrorClass::Reference, "no such ref");
        match Error::from_git2(err, "branch", "dev") {
            Error::NotFound { kind, name } => {
                assert_eq!(kind, "branch");
                assert_eq!(name, "dev");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_error_suggestion() {
        let err = Error::MergeConflict { paths: vec![] };
        assert!(err.suggestion().is_some());
        assert!(err.is_recoverable());
        assert!(!Error::corrupt("bad HEAD").is_recoverable());

        let dirty = Error::DirtyWorktree {
            paths: vec!["notes.txt".into()],
        };
        assert_eq!(dirty.to_string(), "Uncommitted changes in 1 path(s): notes.txt");
        assert!(dirty.suggestion().is_some());
        assert!(dirty.is_recoverable());
    }
}
