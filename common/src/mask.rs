//! Include/exclude masks applied to paths relative to a tree root
//!
//! # Pattern Syntax
//!
//! - `*` matches anything except `/`
//! - `**` matches anything including `/` (crosses directories)
//! - `?` matches a single character (except `/`)
//! - `[...]` character classes
//! - Leading `/` anchors to the tree root
//! - Trailing `/` matches only directories
//!
//! Patterns without a `/` in the middle also match against the last path segment, so `*.log`
//! excludes log files at any depth.
//!
//! # Precedence
//!
//! Excludes are checked first. When include patterns exist a path must match one of them.
//! A directory that matches no include but could still hold a match is reported as
//! [`MaskResult::Traverse`]: walkers descend into it, planners do not select it.
//!
//! ```
//! use common::mask::Mask;
//!
//! let mask = Mask::new(&["*.zip"], &["old/"]).unwrap();
//! assert!(mask.is_match("release/app.zip", false));
//! assert!(!mask.is_match("old", true));
//! assert!(!mask.is_match("notes.txt", false));
//! ```

use anyhow::{Context, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A compiled mask pattern with metadata about its original form
#[derive(Debug, Clone)]
pub struct MaskPattern {
    /// original pattern string, used in log output
    pub original: String,
    matcher: globset::GlobMatcher,
    /// pattern ends with / (matches only directories)
    pub dir_only: bool,
    /// pattern starts with / (anchored to root)
    pub anchored: bool,
}

impl MaskPattern {
    pub fn parse(pattern: &str) -> Result<Self, anyhow::Error> {
        if pattern.is_empty() {
            return Err(anyhow!("empty pattern is not allowed"));
        }
        let dir_only = pattern.ends_with('/');
        let anchored = pattern.starts_with('/');
        let core = pattern.trim_start_matches('/').trim_end_matches('/');
        if core.is_empty() {
            return Err(anyhow!(
                "pattern '{}' results in empty glob after stripping / markers",
                pattern
            ));
        }
        let matcher = globset::GlobBuilder::new(core)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid glob pattern: {}", pattern))?
            .compile_matcher();
        Ok(Self {
            original: pattern.to_string(),
            matcher,
            dir_only,
            anchored,
        })
    }

    fn core(&self) -> &str {
        self.original.trim_start_matches('/').trim_end_matches('/')
    }

    /// Path patterns need a full path match, simple patterns may match the last segment alone.
    fn is_path_pattern(&self) -> bool {
        self.core().contains('/')
    }

    pub fn matches(&self, relative_path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.matcher.is_match(relative_path) {
            return true;
        }
        if self.anchored || self.is_path_pattern() {
            return false;
        }
        relative_path
            .rsplit('/')
            .next()
            .is_some_and(|name| self.matcher.is_match(name))
    }

    /// Literal leading directories of the pattern: `src/foo/**/*.rs` -> `src/foo`.
    fn literal_prefix(&self) -> &str {
        let core = self.core();
        let wildcard = core.find(['*', '?', '[']).unwrap_or(core.len());
        if wildcard == core.len() {
            return core;
        }
        match core[..wildcard].rfind('/') {
            Some(pos) => &core[..pos],
            None => "",
        }
    }

    /// Could a directory at `dir_path` contain something this pattern matches?
    fn could_contain_matches(&self, dir_path: &str) -> bool {
        if !self.anchored && !self.is_path_pattern() {
            return true;
        }
        let prefix = self.literal_prefix();
        if prefix.is_empty() || dir_path.is_empty() {
            return true;
        }
        let is_ancestor = prefix
            .strip_prefix(dir_path)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
        let is_descendant = dir_path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
        is_ancestor || is_descendant
    }
}

/// Why a path was or was not matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskResult {
    Included,
    /// directory not selected itself, but its contents may be
    Traverse,
    /// include patterns exist but none matched
    ExcludedByDefault,
    ExcludedByPattern(String),
}

#[derive(Debug, Clone, Default)]
pub struct Mask {
    pub includes: Vec<MaskPattern>,
    pub excludes: Vec<MaskPattern>,
}

impl Mask {
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Self, anyhow::Error> {
        let mut mask = Self::default();
        for pattern in includes {
            mask.add_include(pattern.as_ref())?;
        }
        for pattern in excludes {
            mask.add_exclude(pattern.as_ref())?;
        }
        Ok(mask)
    }

    /// A mask that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn add_include(&mut self, pattern: &str) -> Result<(), anyhow::Error> {
        self.includes.push(
            MaskPattern::parse(pattern)
                .with_context(|| format!("invalid include mask '{pattern}'"))?,
        );
        Ok(())
    }

    pub fn add_exclude(&mut self, pattern: &str) -> Result<(), anyhow::Error> {
        self.excludes.push(
            MaskPattern::parse(pattern)
                .with_context(|| format!("invalid exclude mask '{pattern}'"))?,
        );
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    pub fn check(&self, relative_path: &str, is_dir: bool) -> MaskResult {
        if let Some(pattern) = self
            .excludes
            .iter()
            .find(|pattern| pattern.matches(relative_path, is_dir))
        {
            return MaskResult::ExcludedByPattern(pattern.original.clone());
        }
        if self.includes.is_empty() {
            return MaskResult::Included;
        }
        if self
            .includes
            .iter()
            .any(|pattern| pattern.matches(relative_path, is_dir))
        {
            return MaskResult::Included;
        }
        if is_dir
            && self
                .includes
                .iter()
                .any(|pattern| pattern.could_contain_matches(relative_path))
        {
            return MaskResult::Traverse;
        }
        MaskResult::ExcludedByDefault
    }

    /// The path itself is selected.
    pub fn is_match(&self, relative_path: &str, is_dir: bool) -> bool {
        self.check(relative_path, is_dir) == MaskResult::Included
    }

    /// A directory walk has to look inside `relative_path`.
    pub fn should_descend(&self, relative_path: &str) -> bool {
        matches!(
            self.check(relative_path, true),
            MaskResult::Included | MaskResult::Traverse
        )
    }
}

#[derive(Serialize, Deserialize)]
struct MaskDto {
    #[serde(default)]
    includes: Vec<String>,
    #[serde(default)]
    excludes: Vec<String>,
}

impl Serialize for Mask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MaskDto {
            includes: self.includes.iter().map(|p| p.original.clone()).collect(),
            excludes: self.excludes.iter().map(|p| p.original.clone()).collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Mask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dto = MaskDto::deserialize(deserializer)?;
        Mask::new(dto.includes.as_slice(), dto.excludes.as_slice())
            .map_err(serde::de::Error::custom)
    }
}
