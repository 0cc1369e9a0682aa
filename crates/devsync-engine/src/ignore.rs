//! Compiled ignore pattern sets
//!
//! Wraps gitignore-syntax pattern lists into an [`IgnoreMatcher`] with a
//! single membership test. Two independent instances exist per session: the
//! general ignore set consulted by every decision, and the upload-only
//! exclusion set consulted by the remote-deletion decision.

use anyhow::Context;
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use devsync_core::domain::RelativePath;

/// An ordered set of gitignore-syntax patterns with a membership test.
pub struct IgnoreMatcher {
    matcher: Gitignore,
    pattern_count: usize,
}

impl IgnoreMatcher {
    /// Compile a matcher from pattern lines.
    ///
    /// Fails on malformed patterns; the session surfaces that as a
    /// configuration error before anything starts running.
    pub fn new(patterns: &[String]) -> anyhow::Result<Self> {
        let mut builder = GitignoreBuilder::new("/");
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("invalid ignore pattern: {pattern}"))?;
        }
        let matcher = builder.build().context("compile ignore patterns")?;
        Ok(Self {
            matcher,
            pattern_count: patterns.len(),
        })
    }

    /// An empty matcher that matches nothing.
    pub fn empty() -> Self {
        Self::new(&[]).expect("empty pattern set always compiles")
    }

    /// Whether `path` (or any of its parent directories) matches a pattern.
    #[must_use]
    pub fn matches(&self, path: &RelativePath, is_dir: bool) -> bool {
        if self.pattern_count == 0 || path.is_root() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(path.as_str().trim_start_matches('/'), is_dir)
            .is_ignore()
    }

    /// Number of compiled pattern lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pattern_count
    }

    /// True when no patterns were configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }
}

impl std::fmt::Debug for IgnoreMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreMatcher")
            .field("patterns", &self.pattern_count)
            .finish()
    }
}

/// The two matcher instances every decision consults.
#[derive(Debug)]
pub struct Matchers {
    /// Applies to all four decisions.
    pub ignore: IgnoreMatcher,
    /// Applies only to the remote-deletion decision.
    pub upload_exclude: IgnoreMatcher,
}

impl Matchers {
    /// Compile both matchers from configuration pattern lists.
    pub fn new(ignore: &[String], upload_exclude: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            ignore: IgnoreMatcher::new(ignore)?,
            upload_exclude: IgnoreMatcher::new(upload_exclude)?,
        })
    }

    /// Matchers that exclude nothing.
    #[must_use]
    pub fn none() -> Self {
        Self {
            ignore: IgnoreMatcher::empty(),
            upload_exclude: IgnoreMatcher::empty(),
        }
    }
}
