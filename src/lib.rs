//! gitsync - safe commit, branch and pull workflows over libgit2
//!
//! Turns low-level object operations into repeatable workflows: committing
//! staged changes with correct parent linkage, pulling a remote branch and
//! merging it with explicit conflict detection and rollback, and offering
//! credentials at most once per network operation.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Path-level operations                        │
//! │  clone  add_all  commit  *_branch  push_branch  pull_branch     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │ Merge-Pull      │  │ Branch Lifecycle │  │ Commit Builder │  │
//! │  │ State Machine   │  │                  │  │ (Head, parents)│  │
//! │  └────────┬────────┘  └────────┬─────────┘  └───────┬────────┘  │
//! │           │                    │                    │           │
//! │  ┌────────▼────────┐  ┌────────▼────────────────────▼────────┐  │
//! │  │ Credential Gate │  │ Conflict inspection / rollback       │  │
//! │  └────────┬────────┘  └────────────────┬─────────────────────┘  │
//! ├───────────┼────────────────────────────┼────────────────────────┤
//! │           ▼                            ▼                        │
//! │              libgit2 (objects, index, refs, transport)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every function below opens exactly one repository handle and releases it
//! before returning. Each either fully succeeds or fails with the repository
//! in its pre-call state; the only exception is a pull whose merge was
//! rolled back, which keeps the remote-tracking ref its fetch updated.

pub mod config;
pub mod error;
pub mod git;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
pub use git::{
    CurrentBranch, Credentials, Head, Identity, PullOptions, PullOutcome, Repository, TransportOptions,
};
pub use git2::Oid;

use std::path::Path;

/// Initialize an empty repository at `path`
pub fn init(path: impl AsRef<Path>) -> Result<()> {
    git::Repository::init(path.as_ref()).map(|_| ())
}

/// Clone `url` into `path`, offering `user`/`secret` at most once
pub fn clone(url: &str, path: impl AsRef<Path>, user: &str, secret: &str) -> Result<()> {
    let credentials = Credentials::new(user, secret);
    git::Repository::clone_remote(url, path.as_ref(), &credentials, &TransportOptions::default()).map(|_| ())
}

/// Stage every change in the working tree
pub fn add_all(path: impl AsRef<Path>) -> Result<()> {
    Repository::open(path.as_ref())?.add_all()
}

/// Commit the staged index as `name <email>`
pub fn commit(path: impl AsRef<Path>, message: &str, name: &str, email: &str) -> Result<Oid> {
    Repository::open(path.as_ref())?.commit(message, &Identity::new(name, email))
}

/// Local branch names, in the store's iteration order
pub fn list_branches(path: impl AsRef<Path>) -> Result<Vec<String>> {
    Repository::open(path.as_ref())?.list_branches()
}

/// Create branch `to` at the tip of `from`
pub fn create_branch(path: impl AsRef<Path>, from: &str, to: &str) -> Result<()> {
    Repository::open(path.as_ref())?.create_branch(from, to)
}

/// Check out a local branch
pub fn checkout_branch(path: impl AsRef<Path>, name: &str) -> Result<()> {
    Repository::open(path.as_ref())?.checkout_branch(name)
}

/// What HEAD names
pub fn current_branch(path: impl AsRef<Path>) -> Result<CurrentBranch> {
    Repository::open(path.as_ref())?.current_branch()
}

/// Delete a local branch
pub fn delete_branch(path: impl AsRef<Path>, name: &str) -> Result<()> {
    Repository::open(path.as_ref())?.delete_branch(name)
}

/// Push `branch` to `remote`
pub fn push_branch(path: impl AsRef<Path>, remote: &str, branch: &str, user: &str, secret: &str) -> Result<()> {
    let credentials = Credentials::new(user, secret);
    Repository::open(path.as_ref())?.push(remote, branch, &credentials, &TransportOptions::default())
}

/// Fetch `branch` from `remote` and merge it into HEAD
pub fn pull_branch(
    path: impl AsRef<Path>,
    remote: &str,
    branch: &str,
    user: &str,
    secret: &str,
    name: &str,
    email: &str,
) -> Result<PullOutcome> {
    let credentials = Credentials::new(user, secret);
    let identity = Identity::new(name, email);
    Repository::open(path.as_ref())?.pull(remote, branch, &credentials, &identity, &PullOptions::default())
}
