//! Version-control style exclusion rules for filesystem churn.

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::debug;

/// Always excluded, before any project rules.
const BUILTIN_RULES: &[&str] = &[
    ".git/",
    "node_modules/",
    "target/",
    "__pycache__/",
    ".venv/",
    ".idea/",
    ".DS_Store",
    "*.swp",
    "*.swo",
    "*~",
    ".#*",
];

#[derive(Debug, Clone)]
struct IgnoreRule {
    pattern: String,
    regex: Regex,
    negated: bool,
    dir_only: bool,
}

/// Ordered exclusion rules. The last rule that matches a path decides.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    root: PathBuf,
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Built-in rules plus `.gitignore` and `.git/info/exclude` under `root`.
    pub fn for_project(root: &Path) -> Self {
        let mut matcher = Self::empty(root);
        for pattern in BUILTIN_RULES {
            matcher.add_rule("", pattern);
        }
        for file in [root.join(".git/info/exclude"), root.join(".gitignore")] {
            if let Ok(content) = std::fs::read_to_string(&file) {
                matcher.add_rules("", &content);
            }
        }
        debug!(root = %root.display(), rules = matcher.len(), "Compiled ignore rules");
        matcher
    }

    /// No rules at all.
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            rules: Vec::new(),
        }
    }

    /// Only the given patterns, in order.
    pub fn from_patterns(root: &Path, patterns: &[&str]) -> Self {
        let mut matcher = Self::empty(root);
        for pattern in patterns {
            matcher.add_rule("", pattern);
        }
        matcher
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Add every rule from an ignore file declared in directory `base`
    /// (relative to the root, `""` for the root itself).
    pub fn add_rules(&mut self, base: &str, content: &str) {
        for line in content.lines() {
            self.add_rule(base, line);
        }
    }

    /// Add one rule. Blank lines and comments are ignored.
    pub fn add_rule(&mut self, base: &str, line: &str) {
        if let Some(rule) = compile(base, line) {
            self.rules.push(rule);
        }
    }

    /// Whether `path` (absolute under the root, or relative to it) is excluded.
    ///
    /// A rule matches when it matches the path itself or any directory above
    /// it, so `build/` covers `build/output.js`. The last matching rule
    /// decides, which lets `!vendor/keep.rs` re-include a file after `vendor/`.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            return false;
        }

        // Every ancestor directory, then the path itself.
        let mut candidates: Vec<(String, bool)> = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let joined = match candidates.last() {
                Some((parent, _)) => format!("{}/{}", parent, part),
                None => part.clone(),
            };
            candidates.push((joined, i < parts.len() - 1 || is_dir));
        }

        self.rules
            .iter()
            .rev()
            .find(|rule| {
                candidates
                    .iter()
                    .any(|(candidate, dir)| (!rule.dir_only || *dir) && rule.regex.is_match(candidate))
            })
            .map(|rule| {
                debug!(path = %relative.display(), rule = %rule.pattern, "Ignore rule matched");
                !rule.negated
            })
            .unwrap_or(false)
    }
}

fn compile(base: &str, line: &str) -> Option<IgnoreRule> {
    let trimmed = line.trim_end();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let (negated, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('\\').unwrap_or(trimmed)),
    };
    let (dir_only, body) = match body.strip_suffix('/') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    if body.is_empty() {
        return None;
    }

    // A slash anywhere but the end pins the pattern to its declaring directory.
    let anchored = body.contains('/');
    let body = body.strip_prefix('/').unwrap_or(body);

    let mut pattern = String::from("^");
    let base = base.trim_matches('/');
    if !base.is_empty() {
        pattern.push_str(&regex::escape(base));
        pattern.push('/');
    }
    if !anchored {
        pattern.push_str("(?:.*/)?");
    }
    pattern.push_str(&glob_to_regex(body));
    pattern.push('$');

    match Regex::new(&pattern) {
        Ok(regex) => Some(IgnoreRule {
            pattern: trimmed.to_string(),
            regex,
            negated,
            dir_only,
        }),
        Err(e) => {
            debug!(rule = trimmed, error = %e, "Skipping invalid ignore rule");
            None
        }
    }
}

fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => match chars[i + 1..].iter().position(|c| *c == ']') {
                Some(len) => {
                    let class: String = chars[i + 1..i + 1 + len].iter().collect();
                    out.push('[');
                    match class.strip_prefix('!') {
                        Some(rest) => {
                            out.push('^');
                            out.push_str(&rest.replace('\\', "\\\\"));
                        }
                        None => out.push_str(&class.replace('\\', "\\\\")),
                    }
                    out.push(']');
                    i += len + 2;
                }
                None => {
                    out.push_str("\\[");
                    i += 1;
                }
            },
            '\\' if i + 1 < chars.len() => {
                out.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 2;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }

    out
}
