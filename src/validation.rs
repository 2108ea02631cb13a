//! Input validation for gitsync
//!
//! Branch and remote names are checked against libgit2's own ref-name rules
//! before any ref is touched, so a bad name fails with a clear message
//! instead of a generic reference error halfway through an operation.

use thiserror::Error;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid {0} '{1}': {2}")]
    Invalid(&'static str, String, &'static str),

    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

/// Validate a local branch short name (`main`, `feature/x`)
///
/// Rules are libgit2's: no `..`, no trailing `.lock`, no control characters,
/// no leading `-`, and the result must form a valid `refs/heads/<name>`.
pub fn validate_branch_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty("branch name"));
    }

    if name.starts_with("refs/") {
        return Err(ValidationError::Invalid(
            "branch name",
            name.to_string(),
            "use the short name, not the full reference path",
        ));
    }

    if !git2::Branch::name_is_valid(name).unwrap_or(false) {
        return Err(ValidationError::Invalid(
            "branch name",
            name.to_string(),
            "not a valid git reference name",
        ));
    }

    Ok(())
}

/// Validate a remote name (`origin`, `upstream`)
pub fn validate_remote_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty("remote name"));
    }

    if !git2::Remote::is_valid_name(name) {
        return Err(ValidationError::Invalid(
            "remote name",
            name.to_string(),
            "not a valid git remote name",
        ));
    }

    Ok(())
}

/// Fully-qualified local branch reference
pub fn local_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// Fully-qualified remote-tracking reference
pub fn remote_tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}

impl From<ValidationError> for crate::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Invalid(kind, name, reason) => crate::Error::InvalidName { kind, name, reason },
            ValidationError::Empty(kind) => crate::Error::InvalidName {
                kind,
                name: String::new(),
                reason: "cannot be empty",
            },
        }
    }
}
