//! Local branch lifecycle: list, create, checkout, inspect, delete

use super::Repository;
use crate::error::{Error, Result};
use crate::validation::{local_ref, validate_branch_name};
use git2::{build::CheckoutBuilder, BranchType, Oid};

/// What HEAD currently names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentBranch {
    /// HEAD is attached to this local branch
    Branch(String),
    /// HEAD points directly at a commit
    Detached(Oid),
    /// HEAD names a branch that has no commits yet
    Unborn(String),
}

impl CurrentBranch {
    /// Branch name, if HEAD is attached (born or unborn)
    pub fn name(&self) -> Option<&str> {
        match self {
            CurrentBranch::Branch(name) | CurrentBranch::Unborn(name) => Some(name),
            CurrentBranch::Detached(_) => None,
        }
    }
}

impl std::fmt::Display for CurrentBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurrentBranch::Branch(name) => write!(f, "{}", name),
            CurrentBranch::Detached(oid) => write!(f, "(detached at {})", oid),
            CurrentBranch::Unborn(name) => write!(f, "{} (no commits yet)", name),
        }
    }
}

impl Repository {
    /// Local branch names in the store's iteration order
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in self.inner.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            match branch.name() {
                Ok(Some(name)) => names.push(name.to_string()),
                _ => tracing::warn!("skipping branch with non-UTF-8 name"),
            }
        }

        Ok(names)
    }

    /// Tip commit of a local branch
    pub fn branch_target(&self, name: &str) -> Result<Oid> {
        let branch = self
            .inner
            .find_branch(name, BranchType::Local)
            .map_err(|e| Error::from_git2(e, "branch", name))?;

        branch
            .get()
            .target()
            .ok_or_else(|| Error::corrupt(format!("branch '{}' has no direct target", name)))
    }

    /// Create `to` pointing at the tip of `from`; never overwrites
    pub fn create_branch(&self, from: &str, to: &str) -> Result<()> {
        validate_branch_name(to)?;

        let target = self.branch_target(from)?;
        let commit = super::commit::find_commit(&self.inner, target)?;

        self.inner
            .branch(to, &commit, false)
            .map_err(|e| Error::from_git2(e, "branch", to))?;

        tracing::info!(from, to, commit = %target, "created branch");
        Ok(())
    }

    /// Switch the working tree and HEAD to a local branch
    ///
    /// The tree is checked out first with the safe strategy; HEAD is moved
    /// only after that succeeds. A failed checkout leaves HEAD untouched. A
    /// failed HEAD update after a successful checkout returns
    /// [`Error::HeadDiverged`]: the working tree shows `name` while HEAD still
    /// names the previous branch, and needs manual repair.
    pub fn checkout_branch(&self, name: &str) -> Result<()> {
        let target = self.branch_target(name)?;
        let commit = super::commit::find_commit(&self.inner, target)?;
        let tree = commit.tree()?;

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.inner
            .checkout_tree(tree.as_object(), Some(&mut checkout))
            .map_err(|source| match source.code() {
                git2::ErrorCode::Conflict => Error::CheckoutConflict {
                    branch: name.to_string(),
                    source,
                },
                _ => source.into(),
            })?;

        self.inner
            .set_head(&local_ref(name))
            .map_err(|source| Error::HeadDiverged {
                branch: name.to_string(),
                source,
            })?;

        tracing::info!(branch = name, commit = %target, "checked out branch");
        Ok(())
    }

    /// Inspect HEAD
    pub fn current_branch(&self) -> Result<CurrentBranch> {
        let head = match self.inner.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                return self.unborn_branch_name().map(CurrentBranch::Unborn);
            }
            Err(e) => return Err(Error::corrupt(format!("cannot resolve HEAD: {}", e.message()))),
        };

        if head.is_branch() {
            if let Some(name) = head.shorthand() {
                return Ok(CurrentBranch::Branch(name.to_string()));
            }
        }

        head.target()
            .map(CurrentBranch::Detached)
            .ok_or_else(|| Error::corrupt("HEAD has no target"))
    }

    /// Branch named by a symbolic HEAD that has no commit yet
    fn unborn_branch_name(&self) -> Result<String> {
        let head = self.inner.find_reference("HEAD")?;
        let target = head
            .symbolic_target()
            .ok_or_else(|| Error::corrupt("unborn HEAD is not symbolic"))?;

        Ok(target.strip_prefix("refs/heads/").unwrap_or(target).to_string())
    }

    /// Delete a local branch
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        let mut branch = self
            .inner
            .find_branch(name, BranchType::Local)
            .map_err(|e| Error::from_git2(e, "branch", name))?;

        branch.delete()?;

        tracing::info!(branch = name, "deleted branch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Identity;
    use tempfile::TempDir;

    fn repo_with_commit() -> (TempDir, Repository) {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("README"), "foo\n").unwrap();
        repo.add_all().unwrap();
        repo.commit("first", &Identity::new("Test", "test@example.com"))
            .unwrap();
        (tmp, repo)
    }

    #[test]
    fn test_list_empty_repository() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        assert!(repo.list_branches().unwrap().is_empty());
    }

    #[test]
    fn test_create_and_list() {
        let (_tmp, repo) = repo_with_commit();
        repo.create_branch("master", "dev").unwrap();

        let mut branches = repo.list_branches().unwrap();
        branches.sort();
        assert_eq!(branches, vec!["dev".to_string(), "master".to_string()]);
        assert_eq!(repo.branch_target("dev").unwrap(), repo.branch_target("master").unwrap());
    }

    #[test]
    fn test_create_from_missing_branch() {
        let (_tmp, repo) = repo_with_commit();
        let err = repo.create_branch("nope", "dev").unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "branch", .. }));
    }

    #[test]
    fn test_create_existing_branch_keeps_target() {
        let (tmp, repo) = repo_with_commit();
        repo.create_branch("master", "dev").unwrap();
        let original = repo.branch_target("dev").unwrap();

        std::fs::write(tmp.path().join("README"), "bar\n").unwrap();
        repo.add_all().unwrap();
        repo.commit("second", &Identity::new("Test", "test@example.com"))
            .unwrap();

        let err = repo.create_branch("master", "dev").unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { kind: "branch", .. }));
        assert_eq!(repo.branch_target("dev").unwrap(), original);
    }

    #[test]
    fn test_current_branch_states() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        assert_eq!(repo.current_branch().unwrap(), CurrentBranch::Unborn("master".into()));

        std::fs::write(tmp.path().join("README"), "foo\n").unwrap();
        repo.add_all().unwrap();
        let oid = repo
            .commit("first", &Identity::new("Test", "test@example.com"))
            .unwrap();
        assert_eq!(repo.current_branch().unwrap(), CurrentBranch::Branch("master".into()));

        repo.inner().set_head_detached(oid).unwrap();
        assert_eq!(repo.current_branch().unwrap(), CurrentBranch::Detached(oid));
        assert_eq!(repo.current_branch().unwrap().name(), None);
    }

    #[test]
    fn test_checkout_moves_head() {
        let (_tmp, repo) = repo_with_commit();
        repo.create_branch("master", "dev").unwrap();
        repo.checkout_branch("dev").unwrap();
        assert_eq!(repo.current_branch().unwrap(), CurrentBranch::Branch("dev".into()));
    }

    #[test]
    fn test_checkout_missing_branch_leaves_head() {
        let (_tmp, repo) = repo_with_commit();
        assert!(matches!(repo.checkout_branch("ghost"), Err(Error::NotFound { .. })));
        assert_eq!(repo.current_branch().unwrap(), CurrentBranch::Branch("master".into()));
    }

    #[test]
    fn test_delete_branch() {
        let (_tmp, repo) = repo_with_commit();
        repo.create_branch("master", "dev").unwrap();
        repo.delete_branch("dev").unwrap();
        assert_eq!(repo.list_branches().unwrap(), vec!["master".to_string()]);

        let err = repo.delete_branch("dev").unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "branch", .. }));
    }

    #[test]
    fn test_invalid_branch_name_rejected() {
        let (_tmp, repo) = repo_with_commit();
        let err = repo.create_branch("master", "bad name").unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }
}
