use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockWriteGuard};

use anyhow::anyhow;
use lazy_static::lazy_static;

use crate::disk::DiskHttpData;
use crate::{HttpData, HttpDataError, Result};

lazy_static! {
    static ref GLOBAL: CleanupRegistry = CleanupRegistry::new();
}

/// The process-wide registry. The host decides when to run it,
/// typically right before shutdown.
pub fn global() -> &'static CleanupRegistry {
    &GLOBAL
}

/// Files the host wants removed when it shuts down.
///
/// Items never register themselves: they only report through
/// [`DiskHttpData::wants_exit_cleanup`] whether their policy asked for it.
#[derive(Default, Debug)]
pub struct CleanupRegistry {
    paths: RwLock<BTreeSet<PathBuf>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeSet<PathBuf>>> {
        self.paths.write().map_err(|_| {
            HttpDataError::Other(anyhow!("Could not lock cleanup registry"))
        })
    }

    /// Returns `false` if the path was already tracked.
    pub fn register(&self, path: impl Into<PathBuf>) -> Result<bool> {
        Ok(self.write()?.insert(path.into()))
    }

    /// Track the item's backing file if it asked for exit cleanup.
    pub fn register_item(&self, item: &DiskHttpData) -> Result<bool> {
        match item.file() {
            Some(path) if item.wants_exit_cleanup() => self.register(path),
            _ => Ok(false),
        }
    }

    pub fn unregister(&self, path: &Path) -> Result<bool> {
        Ok(self.write()?.remove(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths
            .read()
            .map(|paths| paths.contains(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.paths.read().map(|paths| paths.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every tracked file and forget about it.
    ///
    /// Files that are already gone are skipped silently, other failures
    /// are logged. Returns the number of files actually removed.
    pub fn cleanup(&self) -> Result<usize> {
        let paths = std::mem::take(&mut *self.write()?);
        let mut removed = 0;
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "exit cleanup could not remove {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        log::debug!("exit cleanup removed {} files", removed);
        Ok(removed)
    }
}
