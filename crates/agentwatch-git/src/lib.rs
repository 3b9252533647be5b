//! # agentwatch-git
//!
//! Read-only git inspection for agentwatch.
//!
//! When a session closes, the watcher looks at the project's recent history
//! for commits that undo or patch up earlier work. Those commits are a strong
//! hint that a human stepped in.
//!
//! ## Key Types
//!
//! - [`CommitScanner`] - Walks a bounded window of recent commits
//! - [`CommitInfo`] - One commit's id, message and time
//! - [`CommitMarker`] - Revert / fixup classification of a message
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentwatch_git::{CommitScanner, CommitMarker};
//! use std::path::Path;
//!
//! let scanner = CommitScanner::new().with_window(20);
//! for commit in scanner.recent_commits(Path::new("."))? {
//!     if let Some(marker) = CommitMarker::classify(&commit.message) {
//!         println!("{}: {}", marker, commit.summary);
//!     }
//! }
//! ```

mod history;

pub use history::{CommitInfo, CommitMarker, CommitScanner, GitError};
