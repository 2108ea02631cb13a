//! Commit construction with correct parent linkage
//!
//! A repository with no commits has an unborn HEAD; the first commit there
//! has no parents. Every later commit has the current HEAD commit as its
//! single parent, and merge commits always carry two parents in the order
//! (local, remote).

use crate::error::{Error, Result};
use git2::{Commit, Oid, Repository, Signature, Tree};

/// State of HEAD before a commit is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Head {
    /// No commits yet on the current branch
    Unborn,
    /// HEAD resolves to this commit
    Bound(Oid),
}

impl Head {
    /// Resolve HEAD without treating the unborn state as an error
    pub fn resolve(repo: &Repository) -> Result<Self> {
        match repo.head() {
            Ok(reference) => match reference.target() {
                Some(oid) => Ok(Head::Bound(oid)),
                None => Err(Error::corrupt(format!(
                    "HEAD reference '{}' has no direct target",
                    reference.name().unwrap_or("HEAD")
                ))),
            },
            Err(e) if matches!(e.code(), git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound) => {
                Ok(Head::Unborn)
            }
            Err(e) => Err(Error::corrupt(format!("cannot resolve HEAD: {}", e.message()))),
        }
    }

    pub fn oid(&self) -> Option<Oid> {
        match self {
            Head::Unborn => None,
            Head::Bound(oid) => Some(*oid),
        }
    }

    /// Look up the commit HEAD points at
    pub fn commit<'r>(&self, repo: &'r Repository) -> Result<Option<Commit<'r>>> {
        match self {
            Head::Unborn => Ok(None),
            Head::Bound(oid) => find_commit(repo, *oid).map(Some),
        }
    }
}

/// Look up a commit that is expected to exist
pub(crate) fn find_commit(repo: &Repository, oid: Oid) -> Result<Commit<'_>> {
    repo.find_commit(oid)
        .map_err(|e| Error::corrupt(format!("cannot resolve commit {}: {}", oid, e.message())))
}

/// Create a commit on top of `head` and advance HEAD to it
pub fn build_commit(
    repo: &Repository,
    message: &str,
    signature: &Signature<'_>,
    tree: &Tree<'_>,
    head: Head,
) -> Result<Oid> {
    let oid = match head.commit(repo)? {
        None => repo.commit(Some("HEAD"), signature, signature, message, tree, &[])?,
        Some(parent) => repo.commit(Some("HEAD"), signature, signature, message, tree, &[&parent])?,
    };

    tracing::debug!(commit = %oid, parent = ?head.oid(), "created commit");
    Ok(oid)
}

/// Create a two-parent merge commit and advance HEAD to it
pub fn build_merge_commit(
    repo: &Repository,
    message: &str,
    signature: &Signature<'_>,
    tree: &Tree<'_>,
    local: &Commit<'_>,
    remote: &Commit<'_>,
) -> Result<Oid> {
    let oid = repo.commit(Some("HEAD"), signature, signature, message, tree, &[local, remote])?;

    tracing::debug!(commit = %oid, local = %local.id(), remote = %remote.id(), "created merge commit");
    Ok(oid)
}
