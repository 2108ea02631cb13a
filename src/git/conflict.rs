//! Conflict detection and merge rollback
//!
//! Conflicts are surfaced, never resolved. After a merge writes into the
//! index, [`inspect`] reports the conflicted paths; [`rollback`] puts the
//! working tree and index back on the pre-merge commit and clears the merge
//! state so the repository looks as it did before the pull started.

use crate::error::Result;
use git2::{build::CheckoutBuilder, Commit, Index, IndexEntry, Repository, ResetType, StatusOptions};

/// Conflicted paths found in the index after a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub paths: Vec<String>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Read conflict entries from the index
pub fn inspect(index: &Index) -> Result<ConflictReport> {
    if !index.has_conflicts() {
        return Ok(ConflictReport::default());
    }

    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        // Any stage names the path; "ours" is absent for add/delete conflicts
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());
        if let Some(path) = entry.map(entry_path) {
            paths.push(path);
        }
    }

    paths.sort();
    paths.dedup();
    Ok(ConflictReport { paths })
}

fn entry_path(entry: &IndexEntry) -> String {
    String::from_utf8_lossy(&entry.path).into_owned()
}

/// Tracked paths whose index or working tree differs from HEAD
///
/// Untracked and ignored files are left out: [`rollback`] never touches them.
pub fn dirty_paths(repo: &Repository) -> Result<Vec<String>> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(false)
        .include_ignored(false)
        .exclude_submodules(true);

    let statuses = repo.statuses(Some(&mut options))?;
    let mut paths: Vec<String> = statuses
        .iter()
        .filter(|entry| !entry.status().is_empty())
        .filter_map(|entry| entry.path().map(str::to_string))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Hard-reset to `local` and clear any in-progress merge state
pub fn rollback(repo: &Repository, local: &Commit<'_>) -> Result<()> {
    tracing::warn!(commit = %local.id(), "rolling back merge");

    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.reset(local.as_object(), ResetType::Hard, Some(&mut checkout))?;
    repo.cleanup_state()?;

    Ok(())
}

/// Human-readable name for a non-clean repository state
pub fn describe_state(state: git2::RepositoryState) -> Option<&'static str> {
    use git2::RepositoryState::*;

    match state {
        Clean => None,
        Merge => Some("merge"),
        Revert | RevertSequence => Some("revert"),
        CherryPick | CherryPickSequence => Some("cherry-pick"),
        Bisect => Some("bisect"),
        Rebase | RebaseInteractive | RebaseMerge => Some("rebase"),
        ApplyMailbox | ApplyMailboxOrRebase => Some("am"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::path::Path;
    use tempfile::TempDir;

    fn commit_file<'r>(repo: &'r Repository, content: &str, parents: &[&Commit<'_>]) -> Commit<'r> {
        std::fs::write(repo.workdir().unwrap().join("file.txt"), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("file.txt")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let oid = repo.commit(None, &sig, &sig, content, &tree, parents).unwrap();
        repo.find_commit(oid).unwrap()
    }

    #[test]
    fn test_clean_index() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let report = inspect(&repo.index().unwrap()).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_dirty_paths_ignores_untracked() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let base = commit_file(&repo, "base\n", &[]);
        repo.reference("refs/heads/master", base.id(), true, "test").unwrap();
        repo.set_head("refs/heads/master").unwrap();
        assert!(dirty_paths(&repo).unwrap().is_empty());

        std::fs::write(tmp.path().join("scratch.txt"), "untracked\n").unwrap();
        assert!(dirty_paths(&repo).unwrap().is_empty());

        std::fs::write(tmp.path().join("file.txt"), "edited\n").unwrap();
        assert_eq!(dirty_paths(&repo).unwrap(), vec!["file.txt".to_string()]);
    }

    #[test]
    fn test_conflict_then_rollback() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();

        let base = commit_file(&repo, "base\n", &[]);
        let ours = commit_file(&repo, "ours\n", &[&base]);
        let theirs = commit_file(&repo, "theirs\n", &[&base]);

        repo.reference("refs/heads/master", ours.id(), true, "test").unwrap();
        repo.set_head("refs/heads/master").unwrap();
        repo.reset(ours.as_object(), ResetType::Hard, None).unwrap();

        let annotated = repo.find_annotated_commit(theirs.id()).unwrap();
        repo.merge(&[&annotated], None, None).unwrap();

        let report = inspect(&repo.index().unwrap()).unwrap();
        assert_eq!(report.paths, vec!["file.txt".to_string()]);
        assert_eq!(describe_state(repo.state()), Some("merge"));

        rollback(&repo, &ours).unwrap();

        assert!(inspect(&repo.index().unwrap()).unwrap().is_clean());
        assert_eq!(repo.state(), git2::RepositoryState::Clean);
        let content = std::fs::read_to_string(tmp.path().join("file.txt")).unwrap();
        assert_eq!(content, "ours\n");
        assert_eq!(repo.head().unwrap().target(), Some(ours.id()));
    }
}
