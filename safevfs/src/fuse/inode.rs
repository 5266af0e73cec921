//! Inode numbers for a path-addressed filesystem.
//!
//! The VFS knows only paths; the kernel only inode numbers. Numbers are handed
//! out on first sight of a path and stay stable until the path is removed,
//! renamed, or the kernel forgets every lookup it was given. The root is
//! always inode 1.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
struct Table {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    /// Kernel lookup count per inode.
    lookups: HashMap<u64, u64>,
    next: u64,
}

#[derive(Debug)]
pub struct InodeTable {
    inner: Mutex<Table>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Path of `name` inside `parent`.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn is_within(path: &str, dir: &str) -> bool {
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Table {
            by_ino: HashMap::new(),
            by_path: HashMap::new(),
            lookups: HashMap::new(),
            next: ROOT_INO + 1,
        };
        table.by_ino.insert(ROOT_INO, "/".to_string());
        table.by_path.insert("/".to_string(), ROOT_INO);
        Self {
            inner: Mutex::new(table),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.lock().by_ino.get(&ino).cloned()
    }

    /// Inode of `path`, allocating one if needed.
    pub fn intern(&self, path: &str) -> u64 {
        let mut table = self.lock();
        if let Some(ino) = table.by_path.get(path) {
            return *ino;
        }
        let ino = table.next;
        table.next += 1;
        table.by_ino.insert(ino, path.to_string());
        table.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Inode of `path` for an entry reply; the kernel now holds one more lookup.
    pub fn lookup(&self, path: &str) -> u64 {
        let ino = self.intern(path);
        self.remember(ino);
        ino
    }

    /// Count one more kernel lookup of `ino`.
    pub fn remember(&self, ino: u64) {
        *self.lock().lookups.entry(ino).or_default() += 1;
    }

    /// Drop `nlookup` kernel lookups; the inode is released once none remain.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut table = self.lock();
        let Some(count) = table.lookups.get_mut(&ino) else {
            return;
        };
        *count = count.saturating_sub(nlookup);
        if *count > 0 {
            return;
        }
        table.lookups.remove(&ino);
        if let Some(path) = table.by_ino.remove(&ino) {
            table.by_path.remove(&path);
        }
    }

    /// Inode of the parent directory of `ino`.
    pub fn parent_of(&self, ino: u64) -> u64 {
        let Some(path) = self.path_of(ino) else {
            return ROOT_INO;
        };
        match path.rsplit_once('/') {
            Some(("", _)) | None => ROOT_INO,
            Some((parent, _)) => self.intern(parent),
        }
    }

    /// Forget `path` and everything below it.
    pub fn remove(&self, path: &str) {
        let mut table = self.lock();
        let doomed: Vec<(String, u64)> = table
            .by_path
            .iter()
            .filter(|(p, _)| is_within(p, path))
            .map(|(p, i)| (p.clone(), *i))
            .collect();
        for (p, ino) in doomed {
            table.by_path.remove(&p);
            table.by_ino.remove(&ino);
        }
    }

    /// Move `from` and everything below it to `to`, keeping inode numbers.
    pub fn rename(&self, from: &str, to: &str) {
        let mut table = self.lock();
        let stale: Vec<String> = table
            .by_path
            .keys()
            .filter(|p| is_within(p, to))
            .cloned()
            .collect();
        for p in stale {
            if let Some(ino) = table.by_path.remove(&p) {
                table.by_ino.remove(&ino);
            }
        }
        let moved: Vec<(String, u64)> = table
            .by_path
            .iter()
            .filter(|(p, _)| is_within(p, from))
            .map(|(p, i)| (p.clone(), *i))
            .collect();
        for (old, ino) in moved {
            let new = format!("{to}{}", &old[from.len()..]);
            table.by_path.remove(&old);
            table.by_path.insert(new.clone(), ino);
            table.by_ino.insert(ino, new);
        }
    }
}
