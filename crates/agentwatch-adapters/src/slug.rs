//! Codec for project directories flattened into a single path segment.
//!
//! Claude Code names each project's log directory after the project's absolute
//! path with every non-alphanumeric character replaced by `-`, so
//! `/Users/dev/my-project` becomes `-Users-dev-my-project`. The mapping loses
//! information; decoding recovers it by probing the filesystem.

use std::path::{Path, PathBuf};

/// Characters that may have been flattened into a `-`, tried in this order.
const FILLERS: [&str; 4] = ["-", ".", "_", " "];

pub fn flatten(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Recover an absolute path from its flattened form.
///
/// Walks the tokens left to right. At each position the longest run of tokens
/// that, joined by one filler, names an existing directory under the path
/// built so far is consumed; a lone token is consumed whether or not it
/// exists.
pub fn unflatten(flattened: &str) -> PathBuf {
    // An empty token marks a component that began with a non-alphanumeric
    // character (`/.config` -> `--config`); a filler can restore it.
    let rest = flattened.strip_prefix('-').unwrap_or(flattened);
    let tokens: Vec<&str> = rest.split('-').collect();
    let mut current = PathBuf::from("/");
    let mut i = 0;

    while i < tokens.len() {
        let mut consumed = 1;
        'runs: for end in (i + 2..=tokens.len()).rev() {
            for filler in FILLERS {
                let name = tokens[i..end].join(filler);
                if current.join(&name).is_dir() {
                    current.push(name);
                    consumed = end - i;
                    break 'runs;
                }
            }
        }
        if consumed == 1 && !tokens[i].is_empty() {
            current.push(tokens[i]);
        }
        i += consumed;
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten() {
        assert_eq!(
            flatten(Path::new("/Users/dev/my-project")),
            "-Users-dev-my-project"
        );
        assert_eq!(
            flatten(Path::new("/home/dev/.config/app_v2")),
            "-home-dev--config-app-v2"
        );
    }

    #[test]
    fn test_unflatten_prefers_existing_hyphenated_dir() {
        let base = tempfile::Builder::new().prefix("ws").tempdir().unwrap();
        let project = base.path().join("Users/dev/my-project");
        std::fs::create_dir_all(&project).unwrap();

        assert_eq!(unflatten(&flatten(&project)), project);
    }

    #[test]
    fn test_unflatten_without_dir_splits_tokens() {
        let base = tempfile::Builder::new().prefix("ws").tempdir().unwrap();
        let dev = base.path().join("Users/dev");
        std::fs::create_dir_all(&dev).unwrap();

        let decoded = unflatten(&flatten(&dev.join("my-project")));
        assert_eq!(decoded, dev.join("my").join("project"));
    }

    #[test]
    fn test_unflatten_restores_underscore_and_dot() {
        let base = tempfile::Builder::new().prefix("ws").tempdir().unwrap();
        let project = base.path().join("code/.config/app_v2");
        std::fs::create_dir_all(&project).unwrap();

        assert_eq!(unflatten(&flatten(&project)), project);
    }
}
