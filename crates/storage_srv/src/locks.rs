//! Path-keyed edit locks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

/// Mutual exclusion per filesystem path.
///
/// Edits of the same container or fragment serialize; edits of different
/// paths proceed in parallel. Readers do not take these locks.
#[derive(Debug, Default)]
pub struct EditLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// Held until dropped.
#[derive(Debug)]
pub struct EditGuard<'lt> {
    locks: &'lt EditLocks,
    path: PathBuf,
}

impl Drop for EditGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().unwrap().remove(&self.path);
        self.locks.released.notify_all();
    }
}

impl EditLocks {
    /// Block until `path` is free, then take it.
    pub fn lock(&self, path: &Path) -> EditGuard<'_> {
        let mut held = self.held.lock().unwrap();
        while held.contains(path) {
            held = self.released.wait(held).unwrap();
        }
        held.insert(path.to_path_buf());
        EditGuard {
            locks: self,
            path: path.to_path_buf(),
        }
    }

    /// True if someone holds `path`.
    pub fn is_locked(&self, path: &Path) -> bool {
        self.held.lock().unwrap().contains(path)
    }
}
