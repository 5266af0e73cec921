//! Per-namespace directory cache.
//!
//! Each namespace owns one `CacheTree`. Nodes are addressed by the SHA-256 hex
//! digest of each path segment; the digest only normalizes keys, display names
//! are kept in the entries. A node is trusted only while `valid` is set, and
//! every invalidation bumps its generation so a listing that raced it can
//! detect that its snapshot is already stale.

use super::path::Namespace;
use crate::cadapter::ItemInfo;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    File,
    Symlink,
}

/// Cached attributes of one child.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub created_on: Option<String>,
    pub modified_on: Option<String>,
    pub is_private: bool,
}

impl Entry {
    /// Entry for a backend item, displayed as `name`.
    pub fn from_item(item: &ItemInfo, name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: item.size,
            created_on: item.created_on.clone(),
            modified_on: item.modified_on.clone(),
            is_private: item.is_private,
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheNode {
    /// Entry describing this folder in its parent; `None` for roots and
    /// nodes created while walking.
    pub entry: Option<Entry>,
    folders: HashMap<String, CacheNode>,
    files: HashMap<String, Entry>,
    symlinks: HashMap<String, Entry>,
    valid: bool,
    generation: u64,
}

impl CacheNode {
    fn clear(&mut self) {
        self.folders.clear();
        self.files.clear();
        self.symlinks.clear();
    }
}

/// Normalized key of a display name.
pub fn key_for(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Default)]
pub struct CacheTree {
    root: CacheNode,
    /// Last generation handed out. Nodes never share or reuse a value, so a
    /// node dropped by `reset` and created again cannot match a stale read.
    last_generation: u64,
}

impl CacheTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    /// Walk to `path`, creating empty invalid nodes as needed.
    pub fn find_or_create(&mut self, path: &str) -> &mut CacheNode {
        let Self {
            root,
            last_generation,
        } = self;
        let mut node = root;
        for seg in segments(path) {
            node = node.folders.entry(key_for(seg)).or_insert_with(|| {
                *last_generation += 1;
                CacheNode {
                    generation: *last_generation,
                    ..Default::default()
                }
            });
        }
        node
    }

    pub fn find(&self, path: &str) -> Option<&CacheNode> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.folders.get(&key_for(seg))?;
        }
        Some(node)
    }

    /// Insert `entry` into the `kind` bucket of the node at `path`.
    ///
    /// A folder insert replaces the child with fresh, invalid buckets.
    pub fn put(&mut self, kind: EntryKind, path: &str, entry: Entry) {
        let key = key_for(&entry.name);
        match kind {
            EntryKind::Folder => {
                let generation = self.next_generation();
                self.find_or_create(path).folders.insert(
                    key,
                    CacheNode {
                        entry: Some(entry),
                        generation,
                        ..Default::default()
                    },
                );
            }
            EntryKind::File => {
                self.find_or_create(path).files.insert(key, entry);
            }
            EntryKind::Symlink => {
                self.find_or_create(path).symlinks.insert(key, entry);
            }
        }
    }

    pub fn get(&self, kind: EntryKind, path: &str, name: &str) -> Option<&Entry> {
        let node = self.find(path)?;
        let key = key_for(name);
        match kind {
            EntryKind::Folder => node.folders.get(&key).and_then(|n| n.entry.as_ref()),
            EntryKind::File => node.files.get(&key),
            EntryKind::Symlink => node.symlinks.get(&key),
        }
    }

    /// Kind and entry of `name` under `path`; files win over symlinks over folders.
    pub fn lookup(&self, path: &str, name: &str) -> Option<(EntryKind, &Entry)> {
        [EntryKind::File, EntryKind::Symlink, EntryKind::Folder]
            .into_iter()
            .find_map(|kind| self.get(kind, path, name).map(|e| (kind, e)))
    }

    /// Drop every child of `path` ahead of a repopulation.
    pub fn reset(&mut self, path: &str) {
        let node = self.find_or_create(path);
        node.clear();
        node.valid = false;
    }

    pub fn invalidate(&mut self, path: &str) {
        let generation = self.next_generation();
        let node = self.find_or_create(path);
        node.valid = false;
        node.generation = generation;
    }

    pub fn is_valid(&self, path: &str) -> bool {
        self.find(path).is_some_and(|n| n.valid)
    }

    pub fn generation(&self, path: &str) -> u64 {
        self.find(path).map(|n| n.generation).unwrap_or_default()
    }

    /// Generation of `path` taken before a fetch, creating the node first so
    /// the value is the one `mark_valid` will compare against.
    pub fn begin_listing(&mut self, path: &str) -> u64 {
        self.find_or_create(path).generation
    }

    /// Mark `path` valid unless it was invalidated after `generation` was read.
    pub fn mark_valid(&mut self, path: &str, generation: u64) -> bool {
        let node = self.find_or_create(path);
        node.valid = node.generation == generation;
        node.valid
    }

    /// Sorted display names of every child of `path`.
    pub fn names(&self, path: &str) -> Vec<String> {
        let Some(node) = self.find(path) else {
            return Vec::new();
        };
        let mut names: Vec<String> = node
            .folders
            .values()
            .filter_map(|n| n.entry.as_ref().map(|e| e.name.clone()))
            .chain(node.files.values().map(|e| e.name.clone()))
            .chain(node.symlinks.values().map(|e| e.name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Whether `path` holds any file or symlink.
    pub fn has_files(&self, path: &str) -> bool {
        self.find(path)
            .is_some_and(|n| !n.files.is_empty() || !n.symlinks.is_empty())
    }

    pub fn has_folders(&self, path: &str) -> bool {
        self.find(path).is_some_and(|n| !n.folders.is_empty())
    }
}

/// One cache tree per namespace, each behind its own lock.
#[derive(Debug, Default)]
pub struct NamespaceCaches {
    public: Mutex<CacheTree>,
    private: Mutex<CacheTree>,
    outside: Mutex<CacheTree>,
    dns: Mutex<CacheTree>,
}

impl NamespaceCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self, namespace: Namespace) -> MutexGuard<'_, CacheTree> {
        let lock = match namespace {
            Namespace::Public => &self.public,
            Namespace::Private => &self.private,
            Namespace::Outside => &self.outside,
            Namespace::Dns => &self.dns,
        };
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock both drive trees, always `public` first.
    pub fn drive_pair(&self) -> (MutexGuard<'_, CacheTree>, MutexGuard<'_, CacheTree>) {
        let public = self.tree(Namespace::Public);
        let private = self.tree(Namespace::Private);
        (public, private)
    }

    /// Invalidate `path` in both drive trees.
    pub fn invalidate_drive(&self, path: &str) {
        let (mut public, mut private) = self.drive_pair();
        public.invalidate(path);
        private.invalidate(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_and_names() {
        let mut tree = CacheTree::new();
        tree.put(EntryKind::File, "/a", Entry::named("x.txt"));
        tree.put(EntryKind::Symlink, "/a", Entry::named("link"));
        tree.put(EntryKind::Folder, "/a", Entry::named("sub"));

        assert!(tree.get(EntryKind::File, "/a", "x.txt").is_some());
        assert!(tree.get(EntryKind::File, "/a", "link").is_none());
        assert_eq!(
            tree.lookup("/a", "sub").map(|(k, _)| k),
            Some(EntryKind::Folder)
        );
        assert_eq!(tree.names("/a"), vec!["link", "sub", "x.txt"]);
        assert!(tree.names("/missing").is_empty());
        // folder children start invalid
        assert!(!tree.is_valid("/a/sub"));
    }

    #[test]
    fn test_validity_and_generations() {
        let mut tree = CacheTree::new();
        assert!(!tree.is_valid("/"));
        let generation = tree.generation("/");
        tree.reset("/");
        tree.put(EntryKind::File, "/", Entry::named("f"));
        assert!(tree.mark_valid("/", generation));
        assert!(tree.is_valid("/"));

        tree.invalidate("/");
        assert!(!tree.is_valid("/"));
        // a listing that started before the invalidation must not revalidate
        assert!(!tree.mark_valid("/", generation));
        assert!(tree.mark_valid("/", tree.generation("/")));

        tree.reset("/");
        assert!(tree.names("/").is_empty());
        assert!(!tree.is_valid("/"));
    }

    #[test]
    fn test_folder_put_refreshes_child() {
        let mut tree = CacheTree::new();
        tree.put(EntryKind::Folder, "/", Entry::named("d"));
        tree.put(EntryKind::File, "/d", Entry::named("inner"));
        let before = tree.generation("/d");
        assert!(tree.mark_valid("/d", before));

        tree.put(EntryKind::Folder, "/", Entry::named("d"));
        assert!(tree.names("/d").is_empty());
        assert!(!tree.is_valid("/d"));
        assert!(tree.generation("/d") > before);
    }

    #[test]
    fn test_recreated_node_does_not_accept_stale_generation() {
        let mut tree = CacheTree::new();
        tree.put(EntryKind::Folder, "/", Entry::named("a"));
        // slow listing of /a starts
        let seen = tree.begin_listing("/a");
        // a mutation lands, then the parent is listed again
        tree.invalidate("/a");
        tree.reset("/");
        tree.put(EntryKind::Folder, "/", Entry::named("a"));
        tree.put(EntryKind::File, "/a", Entry::named("old"));
        assert!(!tree.mark_valid("/a", seen));
        assert!(!tree.is_valid("/a"));

        // same when the parent listing no longer contains the child
        let seen = tree.begin_listing("/a");
        tree.reset("/");
        assert!(!tree.mark_valid("/a", seen));
    }

    #[test]
    fn test_keys_are_sha256_hex() {
        assert_eq!(
            key_for("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
