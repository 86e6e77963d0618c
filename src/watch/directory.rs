use std::sync::Arc;
use std::time::Duration;

use notify::{PollWatcher, RecursiveMode, Watcher};

use super::WatchError;
use super::registry::WatchKey;

/// Callback shared by every handle, receives the raw event tagged with
/// the key of the handle that produced it.
pub(super) type EventHandler = Arc<dyn Fn(&WatchKey, notify::Result<notify::Event>) + Send + Sync>;

/// How a [`DirectoryWatcher`] is currently attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Native,
    Polling,
    /// Directory missing, waiting for `maintain()` to re-attach.
    Detached,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub use_polling: bool,
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            use_polling: false,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// One live OS watch over one directory (exact) or one subtree.
pub(super) struct DirectoryWatcher {
    key: WatchKey,
    mode: WatchMode,
    /// Must be kept alive, dropping it stops the watch
    handle: Option<Box<dyn Watcher + Send>>,
}

impl DirectoryWatcher {
    /// Attach a handle for `key`.
    ///
    /// Never fails: a native failure falls back to polling, and a missing
    /// directory yields a detached watcher.
    pub(super) fn open(key: WatchKey, options: &WatchOptions, handler: &EventHandler) -> Self {
        let mut watcher = Self::detached(key);
        watcher.attach(options, handler);
        watcher
    }

    pub(super) fn detached(key: WatchKey) -> Self {
        Self {
            key,
            mode: WatchMode::Detached,
            handle: None,
        }
    }

    pub(super) fn mode(&self) -> WatchMode {
        self.mode
    }

    /// Try to (re)attach. Returns true if the watcher is now live.
    pub(super) fn attach(&mut self, options: &WatchOptions, handler: &EventHandler) -> bool {
        self.attach_using(options, handler, Self::native)
    }

    /// [`attach`](Self::attach) with the native backend supplied by the caller.
    pub(super) fn attach_using(
        &mut self,
        options: &WatchOptions,
        handler: &EventHandler,
        native: impl FnOnce(&Self, &EventHandler) -> Result<Box<dyn Watcher + Send>, WatchError>,
    ) -> bool {
        let dir = self.key.dir();
        if !dir.is_dir() {
            crate::debug!("watch"; "directory missing, detached: {}", dir.display());
            self.detach();
            return false;
        }

        if !options.use_polling {
            match native(self, handler) {
                Ok(handle) => {
                    self.handle = Some(handle);
                    self.mode = WatchMode::Native;
                    return true;
                }
                Err(e) => {
                    crate::log!("watch"; "{}, falling back to polling", e);
                }
            }
        }

        match self.polling(options.poll_interval, handler) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.mode = WatchMode::Polling;
                true
            }
            Err(e) => {
                crate::log!("watch"; "{}", e);
                self.detach();
                false
            }
        }
    }

    pub(super) fn detach(&mut self) {
        self.handle = None;
        self.mode = WatchMode::Detached;
    }

    fn recursive_mode(&self) -> RecursiveMode {
        if self.key.is_recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }

    fn native(&self, handler: &EventHandler) -> Result<Box<dyn Watcher + Send>, WatchError> {
        let failed = |source| WatchError::Create {
            path: self.key.dir().to_path_buf(),
            source,
        };

        let mut handle = notify::recommended_watcher(forward(&self.key, handler)).map_err(failed)?;
        handle
            .watch(self.key.dir(), self.recursive_mode())
            .map_err(failed)?;
        Ok(Box::new(handle))
    }

    fn polling(
        &self,
        interval: Duration,
        handler: &EventHandler,
    ) -> Result<Box<dyn Watcher + Send>, WatchError> {
        let failed = |source| WatchError::Create {
            path: self.key.dir().to_path_buf(),
            source,
        };

        let config = notify::Config::default().with_poll_interval(interval);
        let mut handle = PollWatcher::new(forward(&self.key, handler), config).map_err(failed)?;
        handle
            .watch(self.key.dir(), self.recursive_mode())
            .map_err(failed)?;
        Ok(Box::new(handle))
    }
}

/// Bind the shared handler to one key.
fn forward(
    key: &WatchKey,
    handler: &EventHandler,
) -> impl Fn(notify::Result<notify::Event>) + Send + 'static {
    let key = key.clone();
    let handler = Arc::clone(handler);
    move |result| handler(&key, result)
}
