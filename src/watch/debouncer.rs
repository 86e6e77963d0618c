use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::core::{ChangeKind, ChangedPath};

/// Pure debouncer: only handles timing and per-path deduplication.
pub struct Debouncer {
    window: Duration,
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    pub(super) changes: FxHashMap<PathBuf, ChangeKind>,
    pub(super) last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            changes: FxHashMap::default(),
            last_event: None,
        }
    }

    /// Add a change, applying dedup rules:
    /// - removed, then appeared/updated → use the new kind (restored)
    /// - updated, then removed → removed
    /// - appeared, then removed → discard
    /// - otherwise the first change wins
    pub fn add(&mut self, change: ChangedPath) {
        if is_temp_file(&change.path) {
            return;
        }

        let ChangedPath { path, kind } = change;

        if let Some(&existing) = self.changes.get(&path) {
            match (existing, kind) {
                (old, new) if old.is_removal() && !new.is_removal() => {
                    crate::debug!("watch"; "restore {}->{}: {}", old.label(), new.label(), path.display());
                    self.changes.insert(path, new);
                }
                (ChangeKind::Update, new) if new.is_removal() => {
                    crate::debug!("watch"; "upgrade updated->{}: {}", new.label(), path.display());
                    self.changes.insert(path, new);
                }
                (old, new) if old.is_appearance() && new.is_removal() => {
                    crate::debug!("watch"; "discard appeared+removed: {}", path.display());
                    self.changes.remove(&path);
                }
                _ => return,
            }
            self.last_event = Some(Instant::now());
            return;
        }

        crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
        self.changes.insert(path, kind);
        self.last_event = Some(Instant::now());
    }

    /// Take the pending batch once the window has elapsed since the last change.
    pub fn take_if_ready(&mut self) -> Option<Vec<ChangedPath>> {
        if !self.is_ready() {
            return None;
        }

        let changes = std::mem::take(&mut self.changes);
        self.last_event = None;

        let mut batch: Vec<_> = changes
            .into_iter()
            .map(|(path, kind)| ChangedPath { path, kind })
            .collect();
        batch.sort();
        (!batch.is_empty()).then_some(batch)
    }

    pub fn is_ready(&self) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };
        last_event.elapsed() >= self.window && !self.changes.is_empty()
    }

    /// Precise sleep duration until next possible ready time.
    pub fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };

        self.window
            .saturating_sub(last_event.elapsed())
            .max(Duration::from_millis(1))
    }
}

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with(".#")
}
