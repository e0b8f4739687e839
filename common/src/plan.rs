//! Turning a source tree into an ordered list of work items
//!
//! The planner filters the source through the mask, optionally skips files that are older than
//! their counterpart on the destination and orders the result so that a directory is always
//! created before anything inside it and removed only after everything inside it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::entry::{self, Entry};
use crate::mask::Mask;

/// Fixed weight of a file transfer on top of its byte count (connect and finalize).
pub const CONNECT_WEIGHT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Transfer,
    /// destination copy is strictly newer, nothing to do
    SkipNewer,
    CreateDir,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Transfer,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub entry: Entry,
    pub relative_path: String,
    pub action: SyncAction,
}

impl SyncItem {
    /// Work units this item adds to the progress total.
    pub fn weight(&self) -> i64 {
        match self.action {
            SyncAction::Transfer => {
                CONNECT_WEIGHT + i64::try_from(self.entry.size().unwrap_or(0)).unwrap_or(i64::MAX)
            }
            SyncAction::CreateDir | SyncAction::Delete => 1,
            SyncAction::SkipNewer => 0,
        }
    }

    pub fn depth(&self) -> usize {
        entry::depth(&self.relative_path)
    }
}

/// Case-insensitive `relative path -> last modified` index of the files on the destination.
#[derive(Debug, Default, Clone)]
pub struct DestinationIndex {
    files: HashMap<String, DateTime<Utc>>,
}

impl DestinationIndex {
    /// Index the files of a destination tree rooted at `root`, keeping only what `mask` selects.
    pub fn from_entries(entries: &[Entry], root: &str, mask: &Mask) -> Self {
        let mut index = Self::default();
        for entry in entries.iter().filter(|entry| entry.is_file()) {
            let relative = entry.relative_to(root);
            if mask.is_match(&relative, false) {
                index.insert(&relative, entry.last_modified);
            }
        }
        index
    }

    pub fn insert(&mut self, relative_path: &str, last_modified: DateTime<Utc>) {
        self.files
            .insert(relative_path.to_lowercase(), last_modified);
    }

    pub fn get(&self, relative_path: &str) -> Option<DateTime<Utc>> {
        self.files.get(&relative_path.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn is_newer(&self, relative_path: &str, source_modified: DateTime<Utc>) -> bool {
        self.get(relative_path)
            .is_some_and(|destination| destination > source_modified)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub items: Vec<SyncItem>,
    /// source entries that passed the mask, files only
    pub matched_files: usize,
    /// source entries before masking, files only
    pub total_files: usize,
}

impl Plan {
    pub fn total_weight(&self) -> i64 {
        self.items.iter().map(SyncItem::weight).sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split the plan into groups that may each run fully concurrently.
    ///
    /// Transfer plans yield one group per directory depth (shallowest first) followed by one
    /// group holding every file. Delete plans yield one group per depth, deepest first, files
    /// and directories of the same depth together; a directory is always at a smaller depth
    /// than its contents so it lands in a later group.
    pub fn into_phases(self, kind: PlanKind) -> Vec<Vec<SyncItem>> {
        let mut phases: Vec<Vec<SyncItem>> = Vec::new();
        let mut files = Vec::new();
        let mut current_depth = None;
        for item in self.items {
            let is_dir_phase = match kind {
                PlanKind::Transfer => item.action == SyncAction::CreateDir,
                PlanKind::Delete => true,
            };
            if !is_dir_phase {
                files.push(item);
                continue;
            }
            let depth = item.depth();
            if current_depth != Some(depth) {
                phases.push(Vec::new());
                current_depth = Some(depth);
            }
            if let Some(phase) = phases.last_mut() {
                phase.push(item);
            }
        }
        if !files.is_empty() {
            phases.push(files);
        }
        phases
    }
}

/// Parent directories of a relative path, outermost first: `a/b/c` -> `a`, `a/b`.
fn ancestors(relative_path: &str) -> impl Iterator<Item = &str> {
    relative_path
        .match_indices('/')
        .map(move |(idx, _)| &relative_path[..idx])
}

/// Build the ordered item list for one run.
///
/// Only entries the mask selects are planned. Transfer plans also create the parent
/// directories of every selected file; delete plans never touch a directory the mask did not
/// select.
///
/// `destination` is only consulted when `only_if_newer` is set. Files whose destination
/// counterpart is strictly newer are kept in the plan as [`SyncAction::SkipNewer`] so callers
/// can report them; directories are never skipped.
pub fn plan(
    source: &[Entry],
    source_root: &str,
    destination: Option<&DestinationIndex>,
    mask: &Mask,
    only_if_newer: bool,
    kind: PlanKind,
) -> Plan {
    let total_files = source.iter().filter(|entry| entry.is_file()).count();
    let matched: Vec<(String, &Entry)> = source
        .iter()
        .map(|entry| (entry.relative_to(source_root), entry))
        .filter(|(relative, entry)| !relative.is_empty() && mask.is_match(relative, entry.is_dir()))
        .collect();
    let matched_files = matched.iter().filter(|(_, entry)| entry.is_file()).count();
    let skip_index = destination.filter(|_| only_if_newer);
    let mut items: Vec<SyncItem> = match kind {
        PlanKind::Transfer => {
            let source_directories: HashMap<String, &Entry> = source
                .iter()
                .filter(|entry| entry.is_dir())
                .map(|entry| (entry.relative_to(source_root), entry))
                .collect();
            let mut directories = Vec::new();
            let mut planned_directories = HashSet::new();
            let mut files = Vec::new();
            for (relative_path, entry) in &matched {
                if entry.is_dir() && planned_directories.insert(relative_path.clone()) {
                    directories.push(SyncItem {
                        entry: (*entry).clone(),
                        relative_path: relative_path.clone(),
                        action: SyncAction::CreateDir,
                    });
                }
            }
            for (relative_path, entry) in matched {
                if entry.is_dir() {
                    continue;
                }
                // parents of a selected file have to exist on the destination even when the
                // mask does not select them
                for parent in ancestors(&relative_path) {
                    if !planned_directories.insert(parent.to_string()) {
                        continue;
                    }
                    let directory = source_directories.get(parent).map_or_else(
                        || Entry::directory(&entry::join(source_root, parent), entry.last_modified),
                        |directory| (*directory).clone(),
                    );
                    directories.push(SyncItem {
                        entry: directory,
                        relative_path: parent.to_string(),
                        action: SyncAction::CreateDir,
                    });
                }
                let action = match skip_index {
                    Some(index) if index.is_newer(&relative_path, entry.last_modified) => {
                        SyncAction::SkipNewer
                    }
                    _ => SyncAction::Transfer,
                };
                files.push(SyncItem {
                    entry: entry.clone(),
                    relative_path,
                    action,
                });
            }
            directories.sort_by_key(SyncItem::depth);
            directories.extend(files);
            directories
        }
        PlanKind::Delete => matched
            .into_iter()
            .rev()
            .map(|(relative_path, entry)| SyncItem {
                entry: entry.clone(),
                relative_path,
                action: SyncAction::Delete,
            })
            .collect(),
    };
    if kind == PlanKind::Delete {
        // walkers list breadth first, reversing alone already puts contents first; the stable
        // sort keeps that for trees that came in another order
        items.sort_by_key(|item| std::cmp::Reverse(item.depth()));
    }
    Plan {
        items,
        matched_files,
        total_files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn tree() -> Vec<Entry> {
        vec![
            Entry::file("/site/index.html", 10, at(1)),
            Entry::directory("/site/assets", at(1)),
            Entry::directory("/site/assets/img", at(1)),
            Entry::file("/site/assets/main.css", 20, at(1)),
            Entry::file("/site/assets/img/logo.png", 30, at(1)),
        ]
    }

    fn position(items: &[SyncItem], relative: &str) -> usize {
        items
            .iter()
            .position(|item| item.relative_path == relative)
            .unwrap()
    }

    #[test]
    fn transfer_plan_creates_directories_first() {
        let plan = plan(&tree(), "/site", None, &Mask::all(), false, PlanKind::Transfer);
        assert_eq!(plan.matched_files, 3);
        assert_eq!(plan.total_files, 3);
        let items = &plan.items;
        assert!(position(items, "assets") < position(items, "assets/img"));
        assert!(position(items, "assets/img") < position(items, "assets/img/logo.png"));
        assert!(position(items, "assets") < position(items, "assets/main.css"));
        assert_eq!(plan.total_weight(), 2 + 3 * CONNECT_WEIGHT + 60);
    }

    #[test]
    fn delete_plan_removes_contents_first() {
        let plan = plan(&tree(), "/site", None, &Mask::all(), false, PlanKind::Delete);
        let items = &plan.items;
        assert!(position(items, "assets/img/logo.png") < position(items, "assets/img"));
        assert!(position(items, "assets/img") < position(items, "assets"));
        assert!(position(items, "assets/main.css") < position(items, "assets"));
        assert!(items.iter().all(|item| item.weight() == 1));
        assert_eq!(plan.total_weight(), 5);
    }

    #[test]
    fn mask_filters_by_relative_path() {
        let mask = Mask::new(&["*.css"], &[]).unwrap();
        let plan = plan(&tree(), "/site", None, &mask, false, PlanKind::Transfer);
        assert_eq!(plan.matched_files, 1);
        assert_eq!(plan.total_files, 3);
        assert!(plan.items.iter().any(|item| item.relative_path == "assets/main.css"));
        assert!(!plan.items.iter().any(|item| item.relative_path == "index.html"));
    }

    #[test]
    fn include_mask_creates_only_parents_of_selected_files() {
        let mask = Mask::new(&["*.png"], &[]).unwrap();
        let plan = plan(&tree(), "/site", None, &mask, false, PlanKind::Transfer);
        let paths: Vec<&str> = plan.items.iter().map(|item| item.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["assets", "assets/img", "assets/img/logo.png"]);
        assert_eq!(plan.items[0].entry.full_path, "/site/assets");
    }

    #[test]
    fn parents_missing_from_source_are_synthesized() {
        let entries = vec![Entry::file("/site/a/b/c.txt", 1, at(4))];
        let plan = plan(&entries, "/site", None, &Mask::all(), false, PlanKind::Transfer);
        let paths: Vec<&str> = plan.items.iter().map(|item| item.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a", "a/b", "a/b/c.txt"]);
        assert_eq!(plan.items[1].entry.full_path, "/site/a/b");
        assert!(plan.items[1].entry.is_dir());
    }

    #[test]
    fn include_mask_never_deletes_unselected_directories() {
        let entries = vec![
            Entry::directory("/www/logs", at(1)),
            Entry::directory("/www/data", at(1)),
            Entry::file("/www/logs/a.log", 1, at(1)),
            Entry::file("/www/data/keep.txt", 1, at(1)),
            Entry::file("/www/data/b.log", 1, at(1)),
        ];
        let mask = Mask::new(&["*.log"], &[]).unwrap();
        let plan = plan(&entries, "/www", None, &mask, false, PlanKind::Delete);
        let mut paths: Vec<&str> = plan.items.iter().map(|item| item.relative_path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["data/b.log", "logs/a.log"]);
    }

    #[test]
    fn only_newer_skips_strictly_newer_destination() {
        let mut index = DestinationIndex::default();
        index.insert("INDEX.HTML", at(2));
        index.insert("assets/main.css", at(1));
        index.insert("assets", at(9));
        let plan = plan(&tree(), "/site", Some(&index), &Mask::all(), true, PlanKind::Transfer);
        let action = |relative: &str| plan.items[position(&plan.items, relative)].action;
        assert_eq!(action("index.html"), SyncAction::SkipNewer);
        // equal timestamps are transferred
        assert_eq!(action("assets/main.css"), SyncAction::Transfer);
        assert_eq!(action("assets"), SyncAction::CreateDir);
        assert_eq!(action("assets/img/logo.png"), SyncAction::Transfer);
    }

    #[test]
    fn destination_ignored_without_only_newer() {
        let mut index = DestinationIndex::default();
        index.insert("index.html", at(5));
        let plan = plan(&tree(), "/site", Some(&index), &Mask::all(), false, PlanKind::Transfer);
        assert!(plan.items.iter().all(|item| item.action != SyncAction::SkipNewer));
    }

    #[test]
    fn destination_index_from_entries() {
        let entries = vec![
            Entry::file("/dst/a/Readme.TXT", 1, at(3)),
            Entry::directory("/dst/a", at(3)),
            Entry::file("/dst/skip.log", 1, at(3)),
        ];
        let mask = Mask::new(&[] as &[&str], &["*.log"]).unwrap();
        let index = DestinationIndex::from_entries(&entries, "/dst", &mask);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a/readme.txt"), Some(at(3)));
        assert_eq!(index.get("skip.log"), None);
    }

    #[test]
    fn phases_follow_dependencies() {
        let transfer = plan(&tree(), "/site", None, &Mask::all(), false, PlanKind::Transfer);
        let phases = transfer.into_phases(PlanKind::Transfer);
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0][0].relative_path, "assets");
        assert_eq!(phases[1][0].relative_path, "assets/img");
        assert_eq!(phases[2].len(), 3);
        let delete = plan(&tree(), "/site", None, &Mask::all(), false, PlanKind::Delete);
        let phases = delete.into_phases(PlanKind::Delete);
        let depths: Vec<usize> = phases.iter().map(|phase| phase[0].depth()).collect();
        assert_eq!(depths, vec![3, 2, 1]);
    }

    fn relative_tree() -> impl Strategy<Value = Vec<(String, bool)>> {
        prop::collection::vec(
            (prop::collection::vec("[a-c]", 1..4), any::<bool>()),
            1..20,
        )
        .prop_map(|paths| {
            paths
                .into_iter()
                .map(|(segments, is_dir)| (segments.join("/"), is_dir))
                .collect()
        })
    }

    fn entries_of(paths: &[(String, bool)]) -> Vec<Entry> {
        let mut entries: Vec<Entry> = Vec::new();
        for (path, is_dir) in paths {
            let full = format!("/root/{path}");
            if entries.iter().any(|entry| entry.full_path == full) {
                continue;
            }
            if *is_dir {
                entries.push(Entry::directory(&full, at(0)));
            } else {
                entries.push(Entry::file(&full, 1, at(0)));
            }
        }
        entries
    }

    fn nested(file: &str, dir: &str) -> bool {
        file.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
    }

    proptest! {
        #[test]
        fn directories_precede_contents(paths in relative_tree()) {
            let entries = entries_of(&paths);
            let plan = plan(&entries, "/root", None, &Mask::all(), false, PlanKind::Transfer);
            for (d, dir) in plan.items.iter().enumerate().filter(|(_, item)| item.entry.is_dir()) {
                for (f, item) in plan.items.iter().enumerate() {
                    if nested(&item.relative_path, &dir.relative_path) {
                        prop_assert!(d < f);
                    }
                }
            }
        }

        #[test]
        fn directories_follow_contents_on_delete(paths in relative_tree()) {
            let entries = entries_of(&paths);
            let plan = plan(&entries, "/root", None, &Mask::all(), false, PlanKind::Delete);
            for (d, dir) in plan.items.iter().enumerate().filter(|(_, item)| item.entry.is_dir()) {
                for (f, item) in plan.items.iter().enumerate() {
                    if nested(&item.relative_path, &dir.relative_path) {
                        prop_assert!(d > f);
                    }
                }
            }
        }

        #[test]
        fn skip_iff_destination_strictly_newer(
            source_hour in 0u32..24,
            destination_hour in prop::option::of(0u32..24),
        ) {
            let entries = vec![
                Entry::file("/root/f", 1, at(source_hour)),
                Entry::directory("/root/d", at(source_hour)),
            ];
            let mut index = DestinationIndex::default();
            if let Some(hour) = destination_hour {
                index.insert("f", at(hour));
                index.insert("d", at(hour));
            }
            let plan = plan(&entries, "/root", Some(&index), &Mask::all(), true, PlanKind::Transfer);
            let file = plan.items.iter().find(|item| item.relative_path == "f").unwrap();
            let expect_skip = destination_hour.is_some_and(|hour| hour > source_hour);
            prop_assert_eq!(file.action == SyncAction::SkipNewer, expect_skip);
            let dir = plan.items.iter().find(|item| item.relative_path == "d").unwrap();
            prop_assert_eq!(dir.action, SyncAction::CreateDir);
        }
    }
}
