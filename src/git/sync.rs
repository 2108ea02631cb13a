//! Git sync operations for gitsync
//!
//! Clone, fetch and push go through a fresh [`CredentialGate`] each, and
//! pull runs the merge state machine:
//!
//! ```text
//! Idle -> Fetching -> Merging -+-> Conflicted -> RolledBack -> Idle
//!                              +-> Clean      -> Committed  -> Idle
//! ```
//!
//! A conflicted merge is rolled back to the commit HEAD named before the
//! merge started. The remote-tracking ref updated by the fetch is kept.

use super::commit::{self, Head};
use super::conflict;
use super::credentials::{CredentialGate, Credentials};
use super::{Identity, Repository};
use crate::error::{Error, Result};
use crate::validation::{local_ref, remote_tracking_ref, validate_branch_name, validate_remote_name};
use git2::{
    build::CheckoutBuilder, build::RepoBuilder, AnnotatedCommit, FetchOptions, Oid, PushOptions, RemoteCallbacks,
    Signature,
};
use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Knobs shared by every network operation
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Set to abort an in-flight transfer
    pub cancel: Option<Arc<AtomicBool>>,
}

impl TransportOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Pull policy
#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Move the branch ref when the remote is a descendant of HEAD
    pub allow_fast_forward: bool,
    /// Record a two-parent commit even when already up to date.
    ///
    /// Only applies when HEAD is ahead of the remote tip; equal tips would
    /// name the same commit twice, so that case stays `UpToDate`.
    pub commit_when_up_to_date: bool,
    /// Merge commit message; defaults to `Merge branch '<b>' of <remote>`
    pub merge_message: Option<String>,
    pub transport: TransportOptions,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            allow_fast_forward: true,
            commit_when_up_to_date: false,
            merge_message: None,
            transport: TransportOptions::default(),
        }
    }
}

/// How a successful pull changed the branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nothing new on the remote
    UpToDate,
    /// Branch ref moved directly to the remote tip
    FastForward { from: Option<Oid>, to: Oid },
    /// Two-parent merge commit created
    Merged { commit: Oid },
    /// Two-parent commit recorded although nothing was merged
    EmptyMerge { commit: Oid },
}

/// States of the pull state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    Idle,
    Fetching,
    Merging,
    Conflicted,
    RolledBack,
    Clean,
    Committed,
}

struct PullRun<'a> {
    remote: &'a str,
    branch: &'a str,
    state: PullState,
}

impl PullRun<'_> {
    fn enter(&mut self, next: PullState) {
        tracing::debug!(remote = self.remote, branch = self.branch, from = ?self.state, to = ?next, "pull transition");
        self.state = next;
    }
}

/// Callbacks for one network operation: credential gate, cancellation and
/// per-ref push status capture.
fn transport_callbacks<'a>(
    gate: &'a CredentialGate<'_>,
    options: &'a TransportOptions,
    rejections: Option<&'a RefCell<Vec<(String, String)>>>,
) -> RemoteCallbacks<'a> {
    let mut callbacks = gate.remote_callbacks();

    callbacks.transfer_progress(move |progress| {
        tracing::trace!(
            received = progress.received_objects(),
            total = progress.total_objects(),
            "transfer progress"
        );
        !options.cancelled()
    });

    if let Some(rejections) = rejections {
        callbacks.push_update_reference(move |refname, status| {
            if let Some(reason) = status {
                rejections.borrow_mut().push((refname.to_string(), reason.to_string()));
            }
            Ok(())
        });
    }

    callbacks
}

/// Map a transport failure, taking gate and cancel state into account
fn transport_error(err: git2::Error, url: &str, gate: &CredentialGate<'_>, options: &TransportOptions) -> Error {
    if gate.aborted() || err.code() == git2::ErrorCode::Auth {
        return Error::AuthenticationFailed { url: url.to_string() };
    }
    if options.cancelled() {
        return Error::Transport {
            message: "cancelled".to_string(),
            source: Some(err),
        };
    }
    match err.class() {
        git2::ErrorClass::Net | git2::ErrorClass::Http | git2::ErrorClass::Ssh | git2::ErrorClass::Ssl => {
            Error::Transport {
                message: err.message().to_string(),
                source: Some(err),
            }
        }
        _ => err.into(),
    }
}

impl Repository {
    /// Clone `url` into `path`
    pub fn clone_remote(url: &str, path: &Path, credentials: &Credentials, options: &TransportOptions) -> Result<Self> {
        let gate = CredentialGate::new(credentials);
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(transport_callbacks(&gate, options, None));

        tracing::info!(url, path = %path.display(), "cloning");
        let inner = RepoBuilder::new()
            .fetch_options(fetch)
            .clone(url, path)
            .map_err(|e| transport_error(e, url, &gate, options))?;

        Ok(Self { inner })
    }

    /// Fetch from a remote with its configured refspecs
    pub fn fetch(&self, remote_name: &str, credentials: &Credentials, options: &TransportOptions) -> Result<()> {
        validate_remote_name(remote_name)?;

        let mut remote = self
            .inner
            .find_remote(remote_name)
            .map_err(|e| Error::from_git2(e, "remote", remote_name))?;
        let url = remote.url().unwrap_or(remote_name).to_string();

        let gate = CredentialGate::new(credentials);
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(transport_callbacks(&gate, options, None));

        tracing::info!(remote = remote_name, url = %url, "fetching");
        remote
            .fetch::<&str>(&[], Some(&mut fetch), None)
            .map_err(|e| transport_error(e, &url, &gate, options))?;

        let stats = remote.stats();
        tracing::debug!(
            objects = stats.received_objects(),
            bytes = stats.received_bytes(),
            "fetch complete"
        );
        Ok(())
    }

    /// Push a local branch to the same name on a remote
    pub fn push(
        &self,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
        options: &TransportOptions,
    ) -> Result<()> {
        validate_remote_name(remote_name)?;
        validate_branch_name(branch)?;
        self.branch_target(branch)?;

        let mut remote = self
            .inner
            .find_remote(remote_name)
            .map_err(|e| Error::from_git2(e, "remote", remote_name))?;
        let url = remote.url().unwrap_or(remote_name).to_string();

        let refname = local_ref(branch);
        let refspec = format!("{}:{}", refname, refname);
        let rejections = RefCell::new(Vec::new());

        let gate = CredentialGate::new(credentials);
        let mut push = PushOptions::new();
        push.remote_callbacks(transport_callbacks(&gate, options, Some(&rejections)));

        tracing::info!(remote = remote_name, branch, url = %url, "pushing");
        remote
            .push(&[refspec.as_str()], Some(&mut push))
            .map_err(|e| match e.code() {
                git2::ErrorCode::NotFastForward => Error::PushRejected {
                    refname: refname.clone(),
                    reason: e.message().to_string(),
                },
                _ => transport_error(e, &url, &gate, options),
            })?;

        drop(push);
        if let Some((refname, reason)) = rejections.into_inner().into_iter().next() {
            return Err(Error::PushRejected { refname, reason });
        }

        Ok(())
    }

    /// Fetch `branch` from `remote_name` and merge it into HEAD
    ///
    /// On conflict the merge is rolled back and [`Error::MergeConflict`] is
    /// returned; the repository is left as before the call apart from the
    /// remote-tracking ref. Uncommitted changes to tracked files refuse the
    /// pull up front with [`Error::DirtyWorktree`], since rollback resets them.
    pub fn pull(
        &self,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
        identity: &Identity,
        options: &PullOptions,
    ) -> Result<PullOutcome> {
        validate_branch_name(branch)?;

        let mut run = PullRun {
            remote: remote_name,
            branch,
            state: PullState::Idle,
        };

        if let Some(state) = conflict::describe_state(self.inner.state()) {
            return Err(Error::OperationInProgress {
                state: state.to_string(),
            });
        }

        let dirty = conflict::dirty_paths(&self.inner)?;
        if !dirty.is_empty() {
            return Err(Error::DirtyWorktree { paths: dirty });
        }

        let sig = identity.signature()?;

        // Captured before anything mutates the index
        let local = Head::resolve(&self.inner)?;

        run.enter(PullState::Fetching);
        self.fetch(remote_name, credentials, &options.transport)?;

        run.enter(PullState::Merging);
        let tracking = remote_tracking_ref(remote_name, branch);
        let reference = self
            .inner
            .find_reference(&tracking)
            .map_err(|e| Error::from_git2(e, "remote branch", &tracking))?;
        let incoming = self.inner.reference_to_annotated_commit(&reference)?;

        let outcome = self.merge_incoming(&mut run, local, &incoming, &sig, options)?;

        run.enter(PullState::Idle);
        tracing::info!(remote = remote_name, branch, outcome = ?outcome, "pull complete");
        Ok(outcome)
    }

    fn merge_incoming(
        &self,
        run: &mut PullRun<'_>,
        local: Head,
        incoming: &AnnotatedCommit<'_>,
        sig: &Signature<'_>,
        options: &PullOptions,
    ) -> Result<PullOutcome> {
        let (analysis, _) = self.inner.merge_analysis(&[incoming])?;

        if analysis.is_up_to_date() {
            if !options.commit_when_up_to_date {
                return Ok(PullOutcome::UpToDate);
            }
            match local {
                Head::Bound(local_oid) if local_oid != incoming.id() => {
                    let commit = self.commit_up_to_date(local_oid, incoming.id(), run, sig, options)?;
                    return Ok(PullOutcome::EmptyMerge { commit });
                }
                Head::Bound(_) => return Ok(PullOutcome::UpToDate),
                Head::Unborn => {}
            }
        }

        if local == Head::Unborn || (analysis.is_fast_forward() && options.allow_fast_forward) {
            return self.fast_forward(local, incoming.id());
        }

        let local_commit = match local.commit(&self.inner)? {
            Some(commit) => commit,
            None => return Err(Error::corrupt("HEAD became unborn during pull")),
        };

        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true).conflict_style_merge(true);
        if let Err(err) = self.inner.merge(&[incoming], None, Some(&mut checkout)) {
            // Nothing was written; only the merge markers need clearing
            tracing::warn!(error = %err, "merge could not start");
            self.inner.cleanup_state()?;
            return Err(err.into());
        }

        match self.commit_merge(run, &local_commit, incoming, sig, options) {
            Ok(commit) => Ok(PullOutcome::Merged { commit }),
            Err(err) => {
                conflict::rollback(&self.inner, &local_commit)?;
                run.enter(PullState::RolledBack);
                Err(err)
            }
        }
    }

    /// Conflict check, then the two-parent commit for a merged index
    fn commit_merge(
        &self,
        run: &mut PullRun<'_>,
        local: &git2::Commit<'_>,
        incoming: &AnnotatedCommit<'_>,
        sig: &Signature<'_>,
        options: &PullOptions,
    ) -> Result<Oid> {
        let mut index = self.inner.index()?;
        let report = conflict::inspect(&index)?;
        if !report.is_clean() {
            run.enter(PullState::Conflicted);
            return Err(Error::MergeConflict { paths: report.paths });
        }

        run.enter(PullState::Clean);
        let tree_id = index.write_tree()?;
        let tree = self.inner.find_tree(tree_id)?;
        let remote = commit::find_commit(&self.inner, incoming.id())?;

        let message = merge_message(run, options);
        let oid = commit::build_merge_commit(&self.inner, &message, sig, &tree, local, &remote)?;
        self.inner.cleanup_state()?;

        run.enter(PullState::Committed);
        Ok(oid)
    }

    fn commit_up_to_date(
        &self,
        local_oid: Oid,
        remote_oid: Oid,
        run: &mut PullRun<'_>,
        sig: &Signature<'_>,
        options: &PullOptions,
    ) -> Result<Oid> {
        let local = commit::find_commit(&self.inner, local_oid)?;
        let remote = commit::find_commit(&self.inner, remote_oid)?;
        let tree = local.tree()?;

        run.enter(PullState::Clean);
        let message = merge_message(run, options);
        let oid = commit::build_merge_commit(&self.inner, &message, sig, &tree, &local, &remote)?;

        run.enter(PullState::Committed);
        Ok(oid)
    }

    /// Check out `target` then move the branch HEAD names onto it
    fn fast_forward(&self, local: Head, target: Oid) -> Result<PullOutcome> {
        let commit = commit::find_commit(&self.inner, target)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.inner.checkout_tree(commit.as_object(), Some(&mut checkout))?;

        let head_name = self.head_ref_name()?;
        let log = format!("pull: fast-forward to {}", target);
        self.inner.reference(&head_name, target, true, &log)?;

        tracing::debug!(reference = %head_name, from = ?local.oid(), to = %target, "fast-forwarded");
        Ok(PullOutcome::FastForward {
            from: local.oid(),
            to: target,
        })
    }

    /// Reference HEAD resolves through (`HEAD` itself when detached)
    fn head_ref_name(&self) -> Result<String> {
        let head = self.inner.find_reference("HEAD")?;
        Ok(head.symbolic_target().unwrap_or("HEAD").to_string())
    }
}

fn merge_message(run: &PullRun<'_>, options: &PullOptions) -> String {
    options
        .merge_message
        .clone()
        .unwrap_or_else(|| format!("Merge branch '{}' of {}", run.branch, run.remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_transport_options_cancel() {
        let opts = TransportOptions::default();
        assert!(!opts.cancelled());

        let flag = Arc::new(AtomicBool::new(false));
        let opts = TransportOptions {
            cancel: Some(flag.clone()),
        };
        flag.store(true, Ordering::SeqCst);
        assert!(opts.cancelled());
    }

    #[test]
    fn test_merge_message_default_and_override() {
        let run = PullRun {
            remote: "origin",
            branch: "master",
            state: PullState::Idle,
        };
        assert_eq!(merge_message(&run, &PullOptions::default()), "Merge branch 'master' of origin");

        let opts = PullOptions {
            merge_message: Some("merged".into()),
            ..PullOptions::default()
        };
        assert_eq!(merge_message(&run, &opts), "merged");
    }

    #[test]
    fn test_fetch_unknown_remote() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let creds = Credentials::new("user", "secret");

        let err = repo.fetch("origin", &creds, &TransportOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "remote", .. }));
    }

    #[test]
    fn test_transport_error_after_gate_abort_is_auth_failure() {
        let creds = Credentials::new("user", "secret");
        let gate = CredentialGate::new(&creds);
        gate.next_offer();
        gate.next_offer();
        assert!(gate.aborted());

        let err = git2::Error::new(git2::ErrorCode::GenericError, git2::ErrorClass::Net, "connection reset");
        match transport_error(err, "https://example.com/repo.git", &gate, &TransportOptions::default()) {
            Error::AuthenticationFailed { url } => assert_eq!(url, "https://example.com/repo.git"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_transport_error_when_cancelled() {
        let creds = Credentials::new("user", "secret");
        let gate = CredentialGate::new(&creds);
        let opts = TransportOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
        };

        let err = git2::Error::new(git2::ErrorCode::User, git2::ErrorClass::Net, "transfer aborted");
        match transport_error(err, "https://example.com/repo.git", &gate, &opts) {
            Error::Transport { message, source } => {
                assert_eq!(message, "cancelled");
                assert!(source.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_transport_error_plain_network_failure() {
        let creds = Credentials::new("user", "secret");
        let gate = CredentialGate::new(&creds);

        let err = git2::Error::new(git2::ErrorCode::GenericError, git2::ErrorClass::Http, "502 bad gateway");
        let mapped = transport_error(err, "https://example.com/repo.git", &gate, &TransportOptions::default());
        assert!(matches!(mapped, Error::Transport { ref message, .. } if message == "502 bad gateway"));
    }

    #[test]
    fn test_pull_rejects_invalid_identity_before_fetching() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();

        // No "origin" remote exists; a fetch attempt would report NotFound
        let err = repo
            .pull(
                "origin",
                "master",
                &Credentials::new("user", "secret"),
                &Identity::new("<bad>", "bad@example.com"),
                &PullOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Git { .. }), "unexpected: {err:?}");
    }

    #[test]
    fn test_pull_refuses_dangling_merge_state() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        std::fs::write(tmp.path().join(".git").join("MERGE_HEAD"), "1111111111111111111111111111111111111111\n").unwrap();

        let err = repo
            .pull(
                "origin",
                "master",
                &Credentials::new("user", "secret"),
                &Identity::new("Test", "test@example.com"),
                &PullOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::OperationInProgress { .. }));
    }
}
