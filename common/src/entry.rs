//! File tree entries shared by the remote listing parser and the local enumerator
//!
//! Paths are kept as forward-slash strings rather than `std::path::PathBuf` because the remote
//! side is always `/`-separated regardless of the host the engine runs on, and both trees have
//! to be compared using the same canonical form.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    File { size: u64 },
    Directory,
}

/// Best-effort flags derived from listing syntax or local metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Attributes {
    pub hidden: bool,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// normalized absolute path, never contains `.` or `..` segments
    pub full_path: String,
    pub last_modified: DateTime<Utc>,
    pub kind: EntryKind,
    pub attributes: Attributes,
}

impl Entry {
    pub fn file(full_path: &str, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            full_path: normalize(full_path),
            last_modified,
            kind: EntryKind::File { size },
            attributes: Attributes::default(),
        }
    }

    pub fn directory(full_path: &str, last_modified: DateTime<Utc>) -> Self {
        Self {
            full_path: normalize(full_path),
            last_modified,
            kind: EntryKind::Directory,
            attributes: Attributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.full_path
            .rsplit('/')
            .next()
            .unwrap_or(self.full_path.as_str())
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    pub fn size(&self) -> Option<u64> {
        match self.kind {
            EntryKind::File { size } => Some(size),
            EntryKind::Directory => None,
        }
    }

    /// Path relative to `root`, see [`relative_path`].
    pub fn relative_to(&self, root: &str) -> String {
        relative_path(&self.full_path, root)
    }
}

/// Lexically normalize a path: collapse repeated separators, drop `.` segments and resolve
/// `..` against the preceding segment. Absolute inputs stay absolute, `..` never climbs above
/// the root.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Join a listed name onto the directory it was listed from. Absolute names replace the base.
pub fn join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        normalize(name)
    } else {
        normalize(&format!("{base}/{name}"))
    }
}

/// Path of `full_path` relative to `root`: forward slashes, no leading or trailing separator.
///
/// The root only matches on a segment boundary, so `/pub` is not treated as a prefix of
/// `/public/file`. Paths outside `root` are returned whole (trimmed).
pub fn relative_path(full_path: &str, root: &str) -> String {
    let full = full_path.replace('\\', "/");
    let root = root.replace('\\', "/");
    let root = root.trim_end_matches('/');
    let rest = match full.strip_prefix(root) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => full.as_str(),
    };
    rest.trim_matches('/').to_string()
}

/// Number of segments in a relative path, the empty path has depth 0.
pub fn depth(relative_path: &str) -> usize {
    if relative_path.is_empty() {
        0
    } else {
        relative_path.split('/').count()
    }
}

/// Normalize a configured server root so it always starts with `/`.
pub fn normalize_root(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }
    normalize(&format!("/{}", trimmed.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_dot_segments() {
        assert_eq!(normalize("/pub/./etc//passwd"), "/pub/etc/passwd");
        assert_eq!(normalize("/pub/etc/../bin"), "/pub/bin");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("a/b/../c"), "a/c");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn join_relative_and_absolute() {
        assert_eq!(join("/pub", "README"), "/pub/README");
        assert_eq!(join("/", "licensed"), "/licensed");
        assert_eq!(join("/pub/bin", "../usr/bin"), "/pub/usr/bin");
        assert_eq!(join("/pub", "/usr/bin"), "/usr/bin");
        assert_eq!(join("/pub", "my file.txt"), "/pub/my file.txt");
    }

    #[test]
    fn relative_path_respects_segment_boundary() {
        assert_eq!(relative_path("/pub/etc/passwd", "/pub"), "etc/passwd");
        assert_eq!(relative_path("/pub/etc/passwd", "/pub/"), "etc/passwd");
        assert_eq!(relative_path("/pub/etc", "/"), "pub/etc");
        assert_eq!(relative_path("/public/file", "/pub"), "public/file");
        assert_eq!(relative_path("C:\\data\\a\\b.txt", "C:\\data"), "a/b.txt");
        assert_eq!(relative_path("/pub", "/pub"), "");
    }

    #[test]
    fn root_is_always_absolute() {
        assert_eq!(normalize_root(""), "/");
        assert_eq!(normalize_root("pub"), "/pub");
        assert_eq!(normalize_root("/pub/"), "/pub");
        assert_eq!(normalize_root("  /pub/incoming "), "/pub/incoming");
    }

    #[test]
    fn entry_accessors() {
        let now = Utc::now();
        let file = Entry::file("/pub/README", 531, now);
        assert_eq!(file.name(), "README");
        assert_eq!(file.size(), Some(531));
        assert!(file.is_file());
        let dir = Entry::directory("/pub/etc/", now);
        assert_eq!(dir.full_path, "/pub/etc");
        assert_eq!(dir.size(), None);
        assert!(dir.is_dir());
        assert_eq!(dir.relative_to("/pub"), "etc");
        assert_eq!(depth("etc"), 1);
        assert_eq!(depth("etc/init.d/rc"), 3);
        assert_eq!(depth(""), 0);
    }
}
