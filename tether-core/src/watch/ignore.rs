//! Ignore-rule matching for filesystem watches.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Result, TetherError};

/// Compiled ignore rules for one watch, matched against paths relative to
/// the watch root.
///
/// A pattern without glob metacharacters (e.g. `a/c/d`) ignores that path
/// and everything beneath it, so directory rules behave the way users
/// expect.
#[derive(Debug)]
pub struct IgnoreMatcher {
    root: PathBuf,
    set: GlobSet,
}

impl IgnoreMatcher {
    pub fn new(root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            builder.add(compile(pattern)?);
            builder.add(compile(&format!("{pattern}/**"))?);
        }
        let set = builder
            .build()
            .map_err(|err| TetherError::InvalidSpec(format!("invalid ignore set: {err}")))?;
        Ok(Self {
            root: root.into(),
            set,
        })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        self.set.is_match(rel)
    }
}

fn compile(pattern: &str) -> Result<Glob> {
    Glob::new(pattern)
        .map_err(|err| TetherError::InvalidSpec(format!("invalid ignore pattern {pattern:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_rules_cover_descendants() {
        let matcher = IgnoreMatcher::new("/repo", &["a/c/d".to_owned()]).unwrap();
        assert!(matcher.is_ignored(Path::new("/repo/a/c/d")));
        assert!(matcher.is_ignored(Path::new("/repo/a/c/d/e.txt")));
        assert!(matcher.is_ignored(Path::new("/repo/a/c/d/nested/deep.rs")));
        assert!(!matcher.is_ignored(Path::new("/repo/a/c/other.txt")));
        assert!(!matcher.is_ignored(Path::new("/repo/a/b/file.rs")));
    }

    #[test]
    fn glob_rules_match_relative_paths() {
        let matcher =
            IgnoreMatcher::new("/repo", &["**/*.log".to_owned(), "target".to_owned()]).unwrap();
        assert!(matcher.is_ignored(Path::new("/repo/build/out.log")));
        assert!(matcher.is_ignored(Path::new("/repo/target/debug/app")));
        assert!(!matcher.is_ignored(Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn invalid_patterns_are_config_errors() {
        let err = IgnoreMatcher::new("/repo", &["a/[".to_owned()]).unwrap_err();
        assert!(matches!(err, TetherError::InvalidSpec(_)));
    }

    #[test]
    fn empty_rule_list_ignores_nothing() {
        let matcher = IgnoreMatcher::new("/repo", &[]).unwrap();
        assert!(!matcher.is_ignored(Path::new("/repo/anything")));
    }
}
