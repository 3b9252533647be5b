use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Sort};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepo(String),

    #[error("Git operation failed: {0}")]
    GitOperationFailed(#[from] git2::Error),

    #[error("No commits in repository")]
    NoCommits,
}

/// A commit as seen by the signal scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    /// Full raw message.
    pub message: String,
    /// First line of the message.
    pub summary: String,
    pub author: String,
    pub time: DateTime<Utc>,
}

/// What a commit message says about the work before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMarker {
    Revert,
    Fixup,
}

impl CommitMarker {
    /// Classify a raw commit message.
    ///
    /// Reverts: git's own `Revert "..."` / `This reverts commit` text, or a
    /// conventional `revert:` prefix. Fixups: autosquash prefixes
    /// (`fixup!`, `squash!`, `amend!`).
    pub fn classify(message: &str) -> Option<Self> {
        let trimmed = message.trim_start();
        let lower = trimmed.to_lowercase();

        if lower.starts_with("revert ")
            || lower.starts_with("revert:")
            || lower.starts_with("revert(")
            || message.contains("This reverts commit")
        {
            return Some(CommitMarker::Revert);
        }

        if lower.starts_with("fixup!") || lower.starts_with("squash!") || lower.starts_with("amend!")
        {
            return Some(CommitMarker::Fixup);
        }

        None
    }
}

impl std::fmt::Display for CommitMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitMarker::Revert => write!(f, "revert"),
            CommitMarker::Fixup => write!(f, "fixup"),
        }
    }
}

/// Walks the most recent commits reachable from HEAD
pub struct CommitScanner {
    /// Maximum number of commits to look at
    window: usize,
}

impl Default for CommitScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitScanner {
    pub fn new() -> Self {
        Self { window: 20 }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Newest-first list of at most `window` commits for the repository
    /// containing `working_dir`.
    pub fn recent_commits(&self, working_dir: &Path) -> Result<Vec<CommitInfo>, GitError> {
        let repo = Repository::discover(working_dir)
            .map_err(|_| GitError::NotARepo(working_dir.display().to_string()))?;

        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Err(GitError::NoCommits),
            Err(e) => return Err(GitError::GitOperationFailed(e)),
        };
        let head_oid = head.target().ok_or(GitError::NoCommits)?;

        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TIME)?;
        walk.push(head_oid)?;

        let mut commits = Vec::new();
        for oid in walk.take(self.window) {
            let commit = repo.find_commit(oid?)?;
            let message = commit.message().unwrap_or("").to_string();
            let summary = message.lines().next().unwrap_or("").to_string();
            let time = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_else(Utc::now);

            commits.push(CommitInfo {
                id: commit.id().to_string(),
                message,
                summary,
                author: commit.author().name().unwrap_or("").to_string(),
                time,
            });
        }

        debug!(
            dir = %working_dir.display(),
            count = commits.len(),
            "Scanned recent commits"
        );

        Ok(commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn commit(repo: &Repository, message: &str, seconds: i64) {
        let sig = Signature::new("Dev", "dev@example.com", &git2::Time::new(seconds, 0)).unwrap();
        let mut index = repo.index().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn test_classify_revert() {
        assert_eq!(
            CommitMarker::classify("Revert \"add login\"\n\nThis reverts commit abc123."),
            Some(CommitMarker::Revert)
        );
        assert_eq!(
            CommitMarker::classify("revert: drop broken cache"),
            Some(CommitMarker::Revert)
        );
    }

    #[test]
    fn test_classify_fixup() {
        assert_eq!(
            CommitMarker::classify("fixup! add login"),
            Some(CommitMarker::Fixup)
        );
        assert_eq!(
            CommitMarker::classify("squash! add login"),
            Some(CommitMarker::Fixup)
        );
    }

    #[test]
    fn test_classify_plain() {
        assert_eq!(CommitMarker::classify("add login form"), None);
        assert_eq!(CommitMarker::classify("Reverted nothing, fixed typo"), None);
    }

    #[test]
    fn test_recent_commits_window() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit(&repo, "first", 1_700_000_000);
        commit(&repo, "second", 1_700_000_100);
        commit(&repo, "fixup! second", 1_700_000_200);

        let commits = CommitScanner::new()
            .with_window(2)
            .recent_commits(dir.path())
            .unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].summary, "fixup! second");
        assert_eq!(commits[1].summary, "second");
        assert_eq!(commits[0].time.timestamp(), 1_700_000_200);
    }

    #[test]
    fn test_empty_repo_has_no_commits() {
        let dir = tempfile::TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let result = CommitScanner::new().recent_commits(dir.path());
        assert!(matches!(result, Err(GitError::NoCommits)));
    }
}
