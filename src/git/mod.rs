//! Git backend for gitsync
//!
//! Wraps a libgit2 repository and exposes the workflow operations.
//!
//! # Handle Model
//!
//! A [`Repository`] owns exactly one libgit2 handle. The path-level API in
//! the crate root opens one per call and drops it before returning; nothing
//! is cached between operations.
//!
//! # Concurrency Model
//!
//! Operations are synchronous and blocking. The index and working tree are
//! shared mutable state with no locking of their own, so at most one
//! mutating operation may run against a given repository path at a time.
//! Read-only calls (`list_branches`, `current_branch`) may overlap each
//! other but not a commit, checkout or pull.

use crate::error::{Error, Result};
use git2::{IndexAddOption, Repository as Git2Repo, RepositoryInitOptions, Signature};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod branch;
pub mod commit;
pub mod conflict;
pub mod credentials;
mod sync;

pub use branch::CurrentBranch;
pub use commit::Head;
pub use conflict::ConflictReport;
pub use credentials::{CredentialGate, Credentials, Offer};
pub use sync::{PullOptions, PullOutcome, PullState, TransportOptions};

/// Branch created by [`Repository::init`]
pub const DEFAULT_BRANCH: &str = "master";

/// Author/committer identity for new commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// A fresh signature stamped with the current time
    pub fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now(&self.name, &self.email)?)
    }
}

/// Git repository wrapper for gitsync
pub struct Repository {
    inner: Git2Repo,
}

impl Repository {
    /// Open an existing repository
    pub fn open(path: &Path) -> Result<Self> {
        let inner = Git2Repo::open(path).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound => Error::NotFound {
                kind: "repository",
                name: path.display().to_string(),
            },
            _ => e.into(),
        })?;

        Ok(Self { inner })
    }

    /// Initialize an empty repository whose HEAD names [`DEFAULT_BRANCH`]
    pub fn init(path: &Path) -> Result<Self> {
        Self::init_with_branch(path, DEFAULT_BRANCH)
    }

    /// Initialize an empty repository with a chosen unborn branch
    pub fn init_with_branch(path: &Path, branch: &str) -> Result<Self> {
        crate::validation::validate_branch_name(branch)?;

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch);
        let inner = Git2Repo::init_opts(path, &opts)?;

        tracing::info!(path = %path.display(), branch, "initialized repository");
        Ok(Self { inner })
    }

    /// Stage every change in the working tree, deletions included
    pub fn add_all(&self) -> Result<()> {
        let mut index = self.inner.index()?;

        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        tracing::debug!(entries = index.len(), "staged all changes");
        Ok(())
    }

    /// Commit the staged index on top of HEAD
    pub fn commit(&self, message: &str, identity: &Identity) -> Result<git2::Oid> {
        let sig = identity.signature()?;
        let mut index = self.inner.index()?;

        let tree_id = index.write_tree()?;
        let tree = self.inner.find_tree(tree_id)?;

        let head = Head::resolve(&self.inner)?;
        let oid = commit::build_commit(&self.inner, message, &sig, &tree, head)?;

        tracing::info!(commit = %oid, "committed");
        Ok(oid)
    }

    /// Current HEAD state
    pub fn head(&self) -> Result<Head> {
        Head::resolve(&self.inner)
    }

    /// Check if there are uncommitted changes
    pub fn has_changes(&self) -> Result<bool> {
        let statuses = self.inner.statuses(None)?;
        Ok(!statuses.is_empty())
    }

    /// Get the underlying git2 repository (for advanced operations)
    pub fn inner(&self) -> &Git2Repo {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> Identity {
        Identity::new("First Last", "first@last.com")
    }

    #[test]
    fn test_init_repository() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        assert_eq!(repo.head().unwrap(), Head::Unborn);
        assert!(Repository::open(tmp.path()).is_ok());
    }

    #[test]
    fn test_open_missing_repository() {
        let tmp = TempDir::new().unwrap();
        let err = Repository::open(&tmp.path().join("nothing")).err().unwrap();
        assert!(matches!(err, Error::NotFound { kind: "repository", .. }));
    }

    #[test]
    fn test_first_commit() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();

        std::fs::write(tmp.path().join("README"), "foo\n").unwrap();
        repo.add_all().unwrap();
        let oid = repo.commit("first", &identity()).unwrap();

        let commit = repo.inner().find_commit(oid).unwrap();
        assert_eq!(commit.message(), Some("first"));
        assert_eq!(commit.parent_count(), 0);
        assert!(commit.tree().unwrap().get_name("README").is_some());
        assert_eq!(commit.author().email(), Some("first@last.com"));
        assert!(!repo.has_changes().unwrap());
    }

    #[test]
    fn test_add_all_stages_deletions() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();

        std::fs::write(tmp.path().join("a.txt"), "a\n").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b\n").unwrap();
        repo.add_all().unwrap();
        repo.commit("both", &identity()).unwrap();

        std::fs::remove_file(tmp.path().join("b.txt")).unwrap();
        repo.add_all().unwrap();
        let oid = repo.commit("drop b", &identity()).unwrap();

        let tree = repo.inner().find_commit(oid).unwrap().tree().unwrap();
        assert!(tree.get_name("a.txt").is_some());
        assert!(tree.get_name("b.txt").is_none());
    }
}
