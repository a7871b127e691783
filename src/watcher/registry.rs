use crate::watcher::WatchExit;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for one live watcher.
#[derive(Debug)]
pub struct WatchEntry {
    pub dir: PathBuf,
    pub current_file: Option<PathBuf>,
    pub(crate) cancel: CancellationToken,
    pub(crate) handle: Option<JoinHandle<WatchExit>>,
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchInfo {
    pub source: String,
    pub dir: PathBuf,
    pub current_file: Option<PathBuf>,
}

/// Live watchers keyed by source name. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct WatchRegistry {
    inner: Arc<Mutex<HashMap<String, WatchEntry>>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WatchEntry>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, source: &str, dir: PathBuf, cancel: CancellationToken) {
        self.lock().insert(
            source.to_string(),
            WatchEntry {
                dir,
                current_file: None,
                cancel,
                handle: None,
            },
        );
    }

    /// Attach the task running a registered watcher. Returns false when the
    /// watcher already exited and removed itself.
    pub fn attach(&self, source: &str, handle: JoinHandle<WatchExit>) -> bool {
        match self.lock().get_mut(source) {
            Some(entry) => {
                entry.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    pub fn set_file(&self, source: &str, file: Option<PathBuf>) {
        if let Some(entry) = self.lock().get_mut(source) {
            entry.current_file = file;
        }
    }

    pub fn remove(&self, source: &str) -> Option<WatchEntry> {
        self.lock().remove(source)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.lock().contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<WatchInfo> {
        let mut infos: Vec<WatchInfo> = self
            .lock()
            .iter()
            .map(|(source, entry)| WatchInfo {
                source: source.clone(),
                dir: entry.dir.clone(),
                current_file: entry.current_file.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.source.cmp(&b.source));
        infos
    }

    /// Remove and return every entry.
    pub fn take_all(&self) -> Vec<(String, WatchEntry)> {
        self.lock().drain().collect()
    }
}
