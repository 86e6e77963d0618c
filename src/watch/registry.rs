//! Watch coverage bookkeeping.
//!
//! Pure data structure, no OS handles. The [`FileWatcher`](super::FileWatcher)
//! clones it, applies a request, diffs [`WatcherRegistry::keys`] against the
//! live handles and swaps the result in.
//!
//! Invariants held after every mutation:
//! - no `exact` directory is equal to or below a `subtree` root
//! - no `subtree` root is below another `subtree` root

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};

/// Identity of one directory watch handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchKey {
    /// Non-recursive watch over one directory, filtered by file name.
    Exact(PathBuf),
    /// Recursive, unfiltered watch rooted at a directory.
    Subtree(PathBuf),
}

impl WatchKey {
    pub fn dir(&self) -> &Path {
        match self {
            Self::Exact(dir) | Self::Subtree(dir) => dir,
        }
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self, Self::Subtree(_))
    }
}

/// Sorted copy of the registry, for diagnostics and tests.
///
/// An empty name set means every file in the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSnapshot {
    pub exact: BTreeMap<PathBuf, BTreeSet<OsString>>,
    pub subtree: BTreeSet<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct WatcherRegistry {
    /// directory -> watched file names (empty = all files)
    exact: FxHashMap<PathBuf, BTreeSet<OsString>>,
    subtree: FxHashSet<PathBuf>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.subtree.is_empty()
    }

    /// Watch individual files.
    ///
    /// Files under a subtree are already covered. Adding a name to an
    /// all-files entry keeps it all-files.
    pub fn watch_files<P: AsRef<Path>>(&mut self, paths: &[P]) {
        for path in paths {
            let path = path.as_ref();
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };

            if self.subtree_covering(dir).is_some() {
                continue;
            }

            match self.exact.get_mut(dir) {
                Some(names) if names.is_empty() => {}
                Some(names) => {
                    names.insert(name.to_os_string());
                }
                None => {
                    self.exact
                        .insert(dir.to_path_buf(), BTreeSet::from([name.to_os_string()]));
                }
            }
        }
    }

    /// Watch every file in the directory containing each path.
    ///
    /// With `include_subdirectories` the directory becomes a subtree root,
    /// absorbing exact entries and subtree roots below it.
    pub fn watch_containing_directories<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        include_subdirectories: bool,
    ) {
        for path in paths {
            let Some(dir) = path.as_ref().parent() else {
                continue;
            };

            if self.subtree_covering(dir).is_some() {
                continue;
            }

            if include_subdirectories {
                self.subtree.retain(|root| !root.starts_with(dir));
                self.subtree.insert(dir.to_path_buf());
                self.recompute_coverage();
            } else {
                self.exact.insert(dir.to_path_buf(), BTreeSet::new());
            }
        }
    }

    /// Drop every exact entry that a subtree now covers.
    fn recompute_coverage(&mut self) {
        let subtree = &self.subtree;
        self.exact
            .retain(|dir, _| !subtree.iter().any(|root| dir.starts_with(root)));
    }

    /// Subtree root covering `dir` (the directory itself or an ancestor).
    pub fn subtree_covering(&self, dir: &Path) -> Option<&Path> {
        self.subtree
            .iter()
            .find(|root| dir.starts_with(root))
            .map(PathBuf::as_path)
    }

    /// The watch that should deliver events for `path`, if any.
    ///
    /// A subtree covering the containing directory always owns it. An exact
    /// entry owns it only when the file name passes its filter.
    pub fn owner_of(&self, path: &Path) -> Option<WatchKey> {
        let dir = path.parent()?;

        if let Some(root) = self.subtree_covering(dir) {
            return Some(WatchKey::Subtree(root.to_path_buf()));
        }

        let names = self.exact.get(dir)?;
        let name = path.file_name()?;
        if names.is_empty() || names.contains(name) {
            Some(WatchKey::Exact(dir.to_path_buf()))
        } else {
            None
        }
    }

    /// Every handle this registry needs.
    pub fn keys(&self) -> BTreeSet<WatchKey> {
        self.exact
            .keys()
            .cloned()
            .map(WatchKey::Exact)
            .chain(self.subtree.iter().cloned().map(WatchKey::Subtree))
            .collect()
    }

    pub fn snapshot(&self) -> WatchSnapshot {
        WatchSnapshot {
            exact: self
                .exact
                .iter()
                .map(|(dir, names)| (dir.clone(), names.clone()))
                .collect(),
            subtree: self.subtree.iter().cloned().collect(),
        }
    }

    pub fn clear(&mut self) {
        self.exact.clear();
        self.subtree.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<OsString> {
        list.iter().map(OsString::from).collect()
    }

    fn exact(entries: &[(&str, &[&str])]) -> BTreeMap<PathBuf, BTreeSet<OsString>> {
        entries
            .iter()
            .map(|(dir, list)| (PathBuf::from(dir), names(list)))
            .collect()
    }

    fn subtree(roots: &[&str]) -> BTreeSet<PathBuf> {
        roots.iter().map(PathBuf::from).collect()
    }

    fn assert_invariants(registry: &WatcherRegistry) {
        let snapshot = registry.snapshot();
        for dir in snapshot.exact.keys() {
            assert!(
                registry.subtree_covering(dir).is_none(),
                "{} is both exact and under a subtree",
                dir.display()
            );
        }
        for root in &snapshot.subtree {
            let nested = snapshot
                .subtree
                .iter()
                .any(|other| other != root && root.starts_with(other));
            assert!(!nested, "{} is nested in another subtree", root.display());
        }
    }

    #[test]
    fn test_watch_files_groups_by_directory() {
        let mut registry = WatcherRegistry::new();
        registry.watch_files(&["/a/a1", "/a/a2", "/b/b1"]);

        assert_eq!(
            registry.snapshot().exact,
            exact(&[("/a", &["a1", "a2"]), ("/b", &["b1"])])
        );
        assert!(registry.snapshot().subtree.is_empty());
    }

    #[test]
    fn test_directory_merging_sequence() {
        let mut registry = WatcherRegistry::new();

        registry.watch_files(&["/A/a1", "/A/a2"]);
        assert_eq!(registry.snapshot().exact, exact(&[("/A", &["a1", "a2"])]));

        // Containing directory without subdirectories: all files
        registry.watch_containing_directories(&["/A/a1", "/A/a2"], false);
        assert_eq!(registry.snapshot().exact, exact(&[("/A", &[])]));

        // Adding a name to an all-files entry is a no-op
        registry.watch_files(&["/A/a4"]);
        assert_eq!(registry.snapshot().exact, exact(&[("/A", &[])]));

        registry.watch_files(&["/B/b1", "/B/C/bc1"]);
        assert_eq!(
            registry.snapshot().exact,
            exact(&[("/A", &[]), ("/B", &["b1"]), ("/B/C", &["bc1"])])
        );

        // Subtree at /B absorbs /B and /B/C
        registry.watch_containing_directories(&["/B/b2"], true);
        assert_eq!(registry.snapshot().exact, exact(&[("/A", &[])]));
        assert_eq!(registry.snapshot().subtree, subtree(&["/B"]));

        // Already covered
        registry.watch_containing_directories(&["/B/C/bc1"], true);
        registry.watch_files(&["/B/C/D/x"]);
        assert_eq!(registry.snapshot().exact, exact(&[("/A", &[])]));
        assert_eq!(registry.snapshot().subtree, subtree(&["/B"]));

        assert_invariants(&registry);
    }

    #[test]
    fn test_promotion_replaces_exact_watcher() {
        let mut registry = WatcherRegistry::new();
        registry.watch_files(&["/p/a1", "/p/a2"]);
        registry.watch_containing_directories(&["/p/anything"], true);

        let snapshot = registry.snapshot();
        assert!(snapshot.exact.is_empty());
        assert_eq!(snapshot.subtree, subtree(&["/p"]));
        assert_eq!(
            registry.keys(),
            BTreeSet::from([WatchKey::Subtree(PathBuf::from("/p"))])
        );
    }

    #[test]
    fn test_outer_subtree_absorbs_inner() {
        let mut registry = WatcherRegistry::new();
        registry.watch_containing_directories(&["/r/x/y/file"], true);
        registry.watch_containing_directories(&["/r/z/file"], true);
        registry.watch_files(&["/r/top.cs"]);
        assert_eq!(registry.snapshot().subtree, subtree(&["/r/x/y", "/r/z"]));

        registry.watch_containing_directories(&["/r/file"], true);
        assert_eq!(registry.snapshot().subtree, subtree(&["/r"]));
        assert!(registry.snapshot().exact.is_empty());
        assert_invariants(&registry);
    }

    #[test]
    fn test_sibling_prefix_is_not_covered() {
        let mut registry = WatcherRegistry::new();
        registry.watch_containing_directories(&["/src/file"], true);
        registry.watch_files(&["/src2/a.cs"]);

        assert_eq!(registry.snapshot().exact, exact(&[("/src2", &["a.cs"])]));
        assert_invariants(&registry);
    }

    #[test]
    fn test_owner_of_respects_filter() {
        let mut registry = WatcherRegistry::new();
        registry.watch_files(&["/a/keep.cs"]);
        registry.watch_containing_directories(&["/all/x"], false);
        registry.watch_containing_directories(&["/tree/x"], true);

        assert_eq!(
            registry.owner_of(Path::new("/a/keep.cs")),
            Some(WatchKey::Exact(PathBuf::from("/a")))
        );
        assert_eq!(registry.owner_of(Path::new("/a/other.cs")), None);
        assert_eq!(
            registry.owner_of(Path::new("/all/anything.txt")),
            Some(WatchKey::Exact(PathBuf::from("/all")))
        );
        assert_eq!(
            registry.owner_of(Path::new("/tree/deep/down/f.cs")),
            Some(WatchKey::Subtree(PathBuf::from("/tree")))
        );
        // Exact entries are not recursive
        assert_eq!(registry.owner_of(Path::new("/all/sub/f.cs")), None);
        assert_eq!(registry.owner_of(Path::new("/elsewhere/f.cs")), None);
    }

    #[test]
    fn test_filter_is_union_of_requests() {
        let mut registry = WatcherRegistry::new();
        registry.watch_files(&["/d/one"]);
        registry.watch_files(&["/d/two", "/d/one"]);
        registry.watch_files(&["/d/three"]);

        assert_eq!(
            registry.snapshot().exact,
            exact(&[("/d", &["one", "three", "two"])])
        );
    }

    #[test]
    fn test_random_sequences_keep_invariants() {
        let dirs = ["/r", "/r/a", "/r/a/b", "/r/c", "/s", "/s/t"];
        let mut registry = WatcherRegistry::new();

        // Deterministic pseudo-random walk over the three request kinds
        let mut seed: u32 = 7;
        for _ in 0..200 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let dir = dirs[(seed >> 8) as usize % dirs.len()];
            let file = format!("{dir}/f{}", (seed >> 4) % 3);
            match seed % 3 {
                0 => registry.watch_files(&[&file]),
                1 => registry.watch_containing_directories(&[&file], false),
                _ => registry.watch_containing_directories(&[&file], true),
            }
            assert_invariants(&registry);
        }
    }
}
