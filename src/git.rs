//! Release tag discovery from the local git repository.

use crate::errors::InvalidTriggerError;
use anyhow::{Context, Result};
use git2::Repository;
use std::path::Path;

pub struct GitTagSource {
    repo: Repository,
}

impl GitTagSource {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::discover(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// SHA of the HEAD commit, `None` on an unborn branch.
    pub fn head_sha(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .map(|commit| commit.id().to_string())
    }

    /// Names of all tags (lightweight or annotated) pointing at HEAD, sorted.
    pub fn tags_at_head(&self) -> Result<Vec<String>> {
        let head = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .context("Repository has no HEAD commit")?;

        let names = self.repo.tag_names(None).context("Failed to list tags")?;
        let mut tags = Vec::new();
        for name in names.iter().flatten() {
            let target = self
                .repo
                .revparse_single(&format!("refs/tags/{}", name))
                .and_then(|obj| obj.peel_to_commit());
            if let Ok(commit) = target
                && commit.id() == head.id()
            {
                tags.push(name.to_string());
            }
        }
        tags.sort();
        Ok(tags)
    }

    /// The single release tag at HEAD.
    pub fn release_tag(&self) -> Result<String, InvalidTriggerError> {
        let mut tags = self
            .tags_at_head()
            .map_err(|e| InvalidTriggerError::TagDiscovery(format!("{:#}", e)))?;
        match tags.len() {
            0 => Err(InvalidTriggerError::TagDiscovery(
                "HEAD is not tagged".to_string(),
            )),
            1 => Ok(tags.remove(0)),
            _ => Err(InvalidTriggerError::TagDiscovery(format!(
                "HEAD carries several tags: {}",
                tags.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitTagSource, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let source = GitTagSource::new(dir.path()).unwrap();
        (source, dir)
    }

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) -> git2::Oid {
        let repo = Repository::open(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap()
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[]).unwrap()
        }
    }

    fn tag(dir: &Path, name: &str, oid: git2::Oid, annotated: bool) {
        let repo = Repository::open(dir).unwrap();
        let object = repo.find_object(oid, None).unwrap();
        if annotated {
            let sig = git2::Signature::now("test", "test@test.com").unwrap();
            repo.tag(name, &object, &sig, "release", false).unwrap();
        } else {
            repo.tag_lightweight(name, &object, false).unwrap();
        }
    }

    #[test]
    fn test_head_sha_unborn_then_populated() {
        let (source, dir) = setup_repo();
        assert!(source.head_sha().is_none());
        commit_file(dir.path(), "a.txt", "hello", "init");
        assert_eq!(source.head_sha().unwrap().len(), 40);
    }

    #[test]
    fn test_release_tag_at_head() {
        let (source, dir) = setup_repo();
        let first = commit_file(dir.path(), "a.txt", "one", "first");
        tag(dir.path(), "0.6.0", first, false);
        let second = commit_file(dir.path(), "a.txt", "two", "second");
        tag(dir.path(), "0.7.1", second, true);

        assert_eq!(source.tags_at_head().unwrap(), vec!["0.7.1"]);
        assert_eq!(source.release_tag().unwrap(), "0.7.1");
    }

    #[test]
    fn test_untagged_head() {
        let (source, dir) = setup_repo();
        let first = commit_file(dir.path(), "a.txt", "one", "first");
        tag(dir.path(), "0.6.0", first, false);
        commit_file(dir.path(), "a.txt", "two", "second");

        let err = source.release_tag().unwrap_err();
        assert!(matches!(err, InvalidTriggerError::TagDiscovery(ref m) if m.contains("not tagged")));
    }

    #[test]
    fn test_several_tags_at_head() {
        let (source, dir) = setup_repo();
        let oid = commit_file(dir.path(), "a.txt", "one", "first");
        tag(dir.path(), "0.7.1", oid, false);
        tag(dir.path(), "latest-stable", oid, true);

        let err = source.release_tag().unwrap_err();
        assert!(err.to_string().contains("several tags"));
    }

    #[test]
    fn test_unborn_head_is_discovery_error() {
        let (source, _dir) = setup_repo();
        assert!(matches!(
            source.release_tag(),
            Err(InvalidTriggerError::TagDiscovery(_))
        ));
    }
}
