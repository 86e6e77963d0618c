//! File watching with directory-watch consolidation.
//!
//! Callers ask for individual files or whole directories; the
//! [`FileWatcher`] keeps the smallest set of OS handles covering them and
//! delivers each requested file's changes exactly once.
//!
//! ```text
//! notify thread ─(key, event)─► dispatch ─(owner check)─► crossbeam sink
//!                                   ▲
//!                 registry (RwLock) ┘  ◄── watch_* (mutation lock)
//! ```
//!
//! Mutations run clone → apply → open new handles → swap registry →
//! drop stale handles. From the moment new handles open until a grace time
//! after the swap, a [`handoff::Handoff`] accepts changes from the owner
//! under either registry and pairs up reports of the same change, so a
//! promotion neither loses nor duplicates events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::Sender;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::core::ChangedPath;
use crate::utils::path::normalize_file_path;

mod debouncer;
mod directory;
mod event;
mod handoff;
mod registry;


pub use debouncer::Debouncer;
pub use directory::{WatchMode, WatchOptions};
pub use event::changes_from_event;
pub use registry::{WatchKey, WatchSnapshot, WatcherRegistry};

use directory::{DirectoryWatcher, EventHandler};
use handoff::Handoff;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("file watcher has been disposed")]
    Disposed,
}

/// State shared with the notify callback threads.
///
/// Lock order: `registry` before `handoff`.
struct Shared {
    registry: RwLock<WatcherRegistry>,
    handoff: Mutex<Option<Handoff>>,
    sink: Sender<ChangedPath>,
}

impl Shared {
    /// Handles for `next` are about to go live.
    fn begin_handoff(&self, next: &WatcherRegistry) {
        *self.handoff.lock() = Some(Handoff::opening(next.clone()));
    }

    /// Make `next` current; the retired registry keeps ownership for a while.
    fn swap_registry(&self, next: WatcherRegistry, options: &WatchOptions) {
        let mut registry = self.registry.write();
        let previous = std::mem::replace(&mut *registry, next);
        if let Some(handoff) = self.handoff.lock().as_mut() {
            handoff.swapped(previous, options.poll_interval);
        }
    }
}

/// Live handles, guarded by the mutation lock.
#[derive(Default)]
struct Handles {
    watchers: FxHashMap<WatchKey, DirectoryWatcher>,
    disposed: bool,
}

pub struct FileWatcher {
    options: WatchOptions,
    shared: Arc<Shared>,
    handler: EventHandler,
    handles: Mutex<Handles>,
}

impl FileWatcher {
    /// Create an empty watcher delivering into `sink`.
    pub fn new(options: WatchOptions, sink: Sender<ChangedPath>) -> Self {
        let shared = Arc::new(Shared {
            registry: RwLock::new(WatcherRegistry::new()),
            handoff: Mutex::new(None),
            sink,
        });

        let handler: EventHandler = {
            let shared = Arc::clone(&shared);
            Arc::new(move |origin: &WatchKey, result: notify::Result<notify::Event>| match result {
                Ok(event) => dispatch(&shared, origin, &event),
                Err(e) => crate::log!("watch"; "notify error: {}", e),
            })
        };

        Self {
            options,
            shared,
            handler,
            handles: Mutex::new(Handles::default()),
        }
    }

    /// Watch individual files (their directories, filtered by name).
    pub fn watch_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(), WatchError> {
        let paths = normalize_all(paths);
        self.mutate(|registry| registry.watch_files(&paths))
    }

    /// Watch every file in each path's directory, optionally recursively.
    pub fn watch_containing_directories<P: AsRef<Path>>(
        &self,
        paths: &[P],
        include_subdirectories: bool,
    ) -> Result<(), WatchError> {
        let paths = normalize_all(paths);
        self.mutate(|registry| {
            registry.watch_containing_directories(&paths, include_subdirectories)
        })
    }

    pub fn snapshot(&self) -> WatchSnapshot {
        self.shared.registry.read().snapshot()
    }

    /// Attach mode of every live handle.
    pub fn modes(&self) -> Vec<(WatchKey, WatchMode)> {
        let handles = self.handles.lock();
        let mut modes: Vec<_> = handles
            .watchers
            .iter()
            .map(|(key, watcher)| (key.clone(), watcher.mode()))
            .collect();
        modes.sort_by(|a, b| a.0.cmp(&b.0));
        modes
    }

    /// Re-attach detached handles whose directory appeared, detach handles
    /// whose directory vanished. Returns the number re-attached.
    pub fn maintain(&self) -> usize {
        let mut handles = self.handles.lock();
        let mut reattached = 0;

        for (key, watcher) in handles.watchers.iter_mut() {
            let exists = key.dir().is_dir();
            match (watcher.mode(), exists) {
                (WatchMode::Detached, true) => {
                    if watcher.attach(&self.options, &self.handler) {
                        crate::debug!("watch"; "re-attached watch: {}", key.dir().display());
                        reattached += 1;
                    }
                }
                (WatchMode::Native | WatchMode::Polling, false) => {
                    crate::debug!("watch"; "watched directory vanished: {}", key.dir().display());
                    watcher.detach();
                }
                _ => {}
            }
        }

        reattached
    }

    /// Release every handle. Later `watch_*` calls fail with `Disposed`.
    pub fn dispose(&self) {
        let stale = {
            let mut handles = self.handles.lock();
            handles.disposed = true;
            self.shared.registry.write().clear();
            *self.shared.handoff.lock() = None;
            std::mem::take(&mut handles.watchers)
        };
        drop(stale);
    }

    fn mutate(&self, apply: impl FnOnce(&mut WatcherRegistry)) -> Result<(), WatchError> {
        let mut handles = self.handles.lock();
        if handles.disposed {
            return Err(WatchError::Disposed);
        }

        let mut next = self.shared.registry.read().clone();
        apply(&mut next);
        let wanted = next.keys();

        self.shared.begin_handoff(&next);
        for key in &wanted {
            if !handles.watchers.contains_key(key) {
                crate::debug!("watch"; "open {:?}", key);
                let watcher = DirectoryWatcher::open(key.clone(), &self.options, &self.handler);
                handles.watchers.insert(key.clone(), watcher);
            }
        }

        self.shared.swap_registry(next, &self.options);

        let stale: Vec<WatchKey> = handles
            .watchers
            .keys()
            .filter(|key| !wanted.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            crate::debug!("watch"; "close {:?}", key);
            handles.watchers.remove(&key);
        }

        Ok(())
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn normalize_all<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| normalize_file_path(p.as_ref()))
        .collect()
}

/// Deliver the changes of one raw event that `origin` owns.
fn dispatch(shared: &Shared, origin: &WatchKey, event: &notify::Event) {
    let changes = changes_from_event(event);
    if changes.is_empty() {
        return;
    }

    let registry = shared.registry.read();
    let mut handoff = shared.handoff.lock();
    if handoff.as_ref().is_some_and(|h| h.is_expired(Instant::now())) {
        *handoff = None;
    }

    for change in changes {
        let owner = registry.owner_of(&change.path);
        let admitted = match handoff.as_mut() {
            Some(handoff) => handoff.admit(&change, origin, owner.as_ref()),
            None => owner.as_ref() == Some(origin),
        };
        if !admitted {
            continue;
        }
        // Receiver gone means the session is shutting down
        let _ = shared.sink.send(change);
    }
}
