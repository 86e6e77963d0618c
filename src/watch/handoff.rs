//! Ownership handoff while a mutation replaces handles.
//!
//! Between opening a new handle and dropping the one it replaces, both can
//! report the same change, in either order, and the registry swap may fall
//! between the two reports. During that window a change is accepted from
//! the owner under either registry, and a change reported by both owners is
//! delivered once.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use super::registry::{WatchKey, WatcherRegistry};
use crate::core::{ChangeKind, ChangedPath};

/// Minimum time the retired side of a swap keeps ownership.
const GRACE: Duration = Duration::from_secs(2);

pub(super) struct Handoff {
    /// Registry on the other side of the swap.
    other: WatcherRegistry,
    /// `None` until the swap, while new handles are still opening.
    until: Option<Instant>,
    /// Changes delivered from one owner and not yet reported by the other.
    unmatched: FxHashMap<PathBuf, VecDeque<(ChangeKind, WatchKey)>>,
}

impl Handoff {
    /// Handles for `next` are about to open; the registry is not swapped yet.
    pub fn opening(next: WatcherRegistry) -> Self {
        Self {
            other: next,
            until: None,
            unmatched: FxHashMap::default(),
        }
    }

    /// The registry was swapped; `previous` keeps ownership for the grace time.
    pub fn swapped(&mut self, previous: WatcherRegistry, poll_interval: Duration) {
        self.other = previous;
        self.until = Some(Instant::now() + GRACE.max(poll_interval * 2));
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now >= until)
    }

    /// Whether `change`, reported by `origin`, should be delivered. `owner`
    /// is its owner under the current registry.
    pub fn admit(&mut self, change: &ChangedPath, origin: &WatchKey, owner: Option<&WatchKey>) -> bool {
        let other = self.other.owner_of(&change.path);
        let from_owner = owner == Some(origin);
        let from_other = other.as_ref() == Some(origin);
        if !from_owner && !from_other {
            return false;
        }

        match (owner, other.as_ref()) {
            (Some(a), Some(b)) if a != b => self.pair(change, origin),
            _ => true,
        }
    }

    /// Deliver the first report of a change and swallow its twin from the
    /// other owner.
    fn pair(&mut self, change: &ChangedPath, origin: &WatchKey) -> bool {
        let queue = self.unmatched.entry(change.path.clone()).or_default();
        let twin = queue
            .iter()
            .position(|(kind, from)| *kind == change.kind && from != origin);

        match twin {
            Some(index) => {
                queue.remove(index);
                if queue.is_empty() {
                    self.unmatched.remove(&change.path);
                }
                false
            }
            None => {
                queue.push_back((change.kind, origin.clone()));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registries() -> (WatcherRegistry, WatcherRegistry) {
        let mut before = WatcherRegistry::new();
        before.watch_files(&["/p/a1"]);
        let mut after = before.clone();
        after.watch_containing_directories(&["/p/x"], true);
        (before, after)
    }

    #[test]
    fn test_twin_from_same_owner_is_not_swallowed() {
        let (before, after) = registries();
        let mut handoff = Handoff::opening(after);
        let change = ChangedPath::new("/p/a1", ChangeKind::Update);
        let exact = WatchKey::Exact(PathBuf::from("/p"));

        assert!(handoff.admit(&change, &exact, before.owner_of(&change.path).as_ref()));
        assert!(handoff.admit(&change, &exact, before.owner_of(&change.path).as_ref()));
    }

    #[test]
    fn test_different_kind_is_not_a_twin() {
        let (before, after) = registries();
        let mut handoff = Handoff::opening(after);
        let owner = before.owner_of(std::path::Path::new("/p/a1"));

        let update = ChangedPath::new("/p/a1", ChangeKind::Update);
        let delete = ChangedPath::new("/p/a1", ChangeKind::Delete);
        assert!(handoff.admit(&update, &WatchKey::Exact(PathBuf::from("/p")), owner.as_ref()));
        assert!(handoff.admit(&delete, &WatchKey::Subtree(PathBuf::from("/p")), owner.as_ref()));
    }

    #[test]
    fn test_expiry_starts_at_swap() {
        let (before, after) = registries();
        let mut handoff = Handoff::opening(after);
        assert!(!handoff.is_expired(Instant::now() + Duration::from_secs(3600)));

        handoff.swapped(before, Duration::from_secs(1));
        assert!(!handoff.is_expired(Instant::now()));
        assert!(handoff.is_expired(Instant::now() + GRACE + Duration::from_millis(1)));
    }
}
