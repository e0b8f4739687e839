//! Recursive listing dumps, in the layout `ls -lR` prints
//!
//! ```text
//! .:
//! total 2
//! -rw-r--r-- 1 ftp ftp  531 Jan 29 03:26 README
//! drwxr-xr-x 2 ftp ftp  512 Apr  8  1994 etc
//!
//! ./etc:
//! total 1
//! -rw-r--r-- 1 ftp ftp   42 Apr  8  1994 passwd
//! ```
//!
//! Section headers are lines ending in `:` at the start of the text or after a blank line.
//! Relative headers are taken relative to the root the dump was made from. Lines before the
//! first header belong to the root.

use std::collections::HashMap;

/// `total N` lines are printed by `ls` but are not entries.
pub fn is_total_line(line: &str) -> bool {
    line.strip_prefix("total ")
        .is_some_and(|count| count.trim().chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Default)]
pub struct Dump {
    sections: HashMap<String, Vec<String>>,
}

impl Dump {
    pub fn parse(text: &str, root: &str) -> Self {
        let root = common::entry::normalize_root(root);
        let mut sections: HashMap<String, Vec<String>> = HashMap::new();
        let mut current = root.clone();
        let mut at_boundary = true;
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                at_boundary = true;
                continue;
            }
            if at_boundary && line.ends_with(':') {
                current = common::entry::join(&root, line.trim_end_matches(':'));
                sections.entry(current.clone()).or_default();
                at_boundary = false;
                continue;
            }
            at_boundary = false;
            if is_total_line(line) {
                continue;
            }
            sections
                .entry(current.clone())
                .or_default()
                .push(line.to_string());
        }
        Self { sections }
    }

    pub fn lines(&self, path: &str) -> Option<&[String]> {
        self.sections.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }
}
