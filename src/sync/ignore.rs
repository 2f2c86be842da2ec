//! Ignore patterns for synchronized and watched files.

use glob::Pattern;
use std::path::{Component, Path};
use tracing::warn;

/// Paths never synchronized.
pub const DEFAULT_IGNORES: &[&str] = &[".astra", ".git"];

/// Ignore files, by priority.
const IGNORE_FILES: &[&str] = &[".astraignore", ".gitignore"];

/// Reads the ignore patterns of `dir`.
///
/// Uses `.astraignore` when present, `.gitignore` otherwise, and always
/// adds [`DEFAULT_IGNORES`].
#[must_use]
pub fn load_ignores(dir: &Path) -> Vec<String> {
    let mut patterns: Vec<String> = DEFAULT_IGNORES.iter().map(|p| (*p).to_string()).collect();

    let content = IGNORE_FILES
        .iter()
        .find_map(|name| std::fs::read_to_string(dir.join(name)).ok());
    if let Some(content) = content {
        patterns.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    patterns
}

/// Matches relative paths against gitignore-style patterns.
///
/// A pattern matching a directory ignores everything below it. Patterns
/// without a slash match a name at any depth.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    /// Patterns anchored at the root.
    anchored: Vec<Pattern>,
    /// Patterns matched against each path element.
    names: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Compiles `patterns`, skipping invalid ones.
    #[must_use]
    pub fn new(patterns: &[String]) -> Self {
        let mut matcher = Self::default();
        for raw in patterns {
            let trimmed = raw.trim_end_matches('/');
            let (anchored, pattern) = trimmed
                .strip_prefix('/')
                .map_or((trimmed.contains('/'), trimmed), |p| (true, p));
            match Pattern::new(pattern) {
                Ok(p) if anchored => matcher.anchored.push(p),
                Ok(p) => matcher.names.push(p),
                Err(e) => warn!("Ignoring invalid pattern {:?}: {}", raw, e),
            }
        }
        matcher
    }

    /// Whether `rel`, relative to the component directory, is ignored.
    #[must_use]
    pub fn is_ignored(&self, rel: &Path) -> bool {
        let mut prefix = String::new();
        for component in rel.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_string_lossy();
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(&name);

            if self.names.iter().any(|p| p.matches(&name))
                || self.anchored.iter().any(|p| p.matches(&prefix))
            {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn matcher(patterns: &[&str]) -> IgnoreMatcher {
        IgnoreMatcher::new(&patterns.iter().map(|p| (*p).to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_name_patterns_match_at_any_depth() {
        let m = matcher(&["*.log", "node_modules/"]);
        assert!(m.is_ignored(Path::new("debug.log")));
        assert!(m.is_ignored(Path::new("src/out/debug.log")));
        assert!(m.is_ignored(Path::new("web/node_modules/react/index.js")));
        assert!(!m.is_ignored(Path::new("src/main.rs")));
    }

    #[test]
    fn test_anchored_patterns() {
        let m = matcher(&["/target", "docs/generated"]);
        assert!(m.is_ignored(Path::new("target/debug/app")));
        assert!(!m.is_ignored(Path::new("src/target/file")));
        assert!(m.is_ignored(Path::new("docs/generated/index.html")));
        assert!(!m.is_ignored(Path::new("docs/guide.md")));
    }

    #[test]
    fn test_load_ignores_prefers_astraignore() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "from-git\n").expect("write");
        std::fs::write(dir.path().join(".astraignore"), "# comment\n\nfrom-astra\n").expect("write");

        let patterns = load_ignores(dir.path());
        assert!(patterns.contains(&String::from(".astra")));
        assert!(patterns.contains(&String::from(".git")));
        assert!(patterns.contains(&String::from("from-astra")));
        assert!(!patterns.contains(&String::from("from-git")));
        assert!(!patterns.iter().any(|p| p.starts_with('#')));
    }
}
