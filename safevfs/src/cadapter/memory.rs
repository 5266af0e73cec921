//! In-memory storage network, used by tests and by the `safevfs` binary.
//!
//! It mimics the behaviour the adapter has to cope with on the real network:
//! one flat item set per directory (a file and a directory may not share a
//! name, whatever their privacy), no in-place update, and zero-byte bodies
//! being refused. Every trait call is counted so tests can assert how often
//! the cache went back to the network.

use super::{BackendError, BackendResult, DirectoryListing, ItemInfo, RootPath, SafeBackend};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug)]
struct MemFile {
    body: Vec<u8>,
    is_private: bool,
    created_on: String,
    modified_on: String,
}

#[derive(Clone, Debug, Default)]
struct MemDir {
    is_private: bool,
    created_on: String,
    modified_on: String,
    dirs: BTreeMap<String, MemDir>,
    files: BTreeMap<String, MemFile>,
}

impl MemDir {
    fn new(is_private: bool) -> Self {
        let now = now_rfc3339();
        Self {
            is_private,
            created_on: now.clone(),
            modified_on: now,
            ..Default::default()
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.dirs.contains_key(name) || self.files.contains_key(name)
    }

    fn info(&self, name: &str) -> ItemInfo {
        ItemInfo {
            name: name.to_string(),
            size: 0,
            created_on: Some(self.created_on.clone()),
            modified_on: Some(self.modified_on.clone()),
            is_private: self.is_private,
        }
    }

    fn listing(&self, name: &str) -> DirectoryListing {
        DirectoryListing {
            info: self.info(name),
            files: self
                .files
                .iter()
                .map(|(n, f)| ItemInfo {
                    name: n.clone(),
                    size: f.body.len() as u64,
                    created_on: Some(f.created_on.clone()),
                    modified_on: Some(f.modified_on.clone()),
                    is_private: f.is_private,
                })
                .collect(),
            sub_directories: self.dirs.iter().map(|(n, d)| d.info(n)).collect(),
        }
    }

    fn dir(&self, segments: &[&str]) -> Option<&MemDir> {
        let mut cur = self;
        for seg in segments {
            cur = cur.dirs.get(*seg)?;
        }
        Some(cur)
    }

    fn dir_mut(&mut self, segments: &[&str]) -> Option<&mut MemDir> {
        let mut cur = self;
        for seg in segments {
            cur = cur.dirs.get_mut(*seg)?;
        }
        Some(cur)
    }
}

#[derive(Default)]
struct State {
    app: MemDir,
    drive: MemDir,
    /// long name -> service -> home directory (a drive path)
    services: BTreeMap<String, BTreeMap<String, String>>,
    /// long names owned by the mounting user
    owned: BTreeSet<String>,
}

impl State {
    fn root(&self, root: RootPath) -> &MemDir {
        match root {
            RootPath::App => &self.app,
            RootPath::Drive => &self.drive,
        }
    }

    fn root_mut(&mut self, root: RootPath) -> &mut MemDir {
        match root {
            RootPath::App => &mut self.app,
            RootPath::Drive => &mut self.drive,
        }
    }

    /// Resolve the parent directory of `path` and return it with the final name.
    fn parent_mut<'a>(
        &mut self,
        root: RootPath,
        path: &'a str,
    ) -> BackendResult<(&mut MemDir, &'a str)> {
        let segments = segments(path);
        let Some((name, parents)) = segments.split_last() else {
            return Err(BackendError::Rejected {
                code: -1500,
                description: "cannot address the root itself".into(),
            });
        };
        let dir = self
            .root_mut(root)
            .dir_mut(parents)
            .ok_or_else(|| BackendError::not_found(path))?;
        Ok((dir, *name))
    }
}

/// In-process `SafeBackend`.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashSet<&'static str>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, op: &'static str) -> BackendResult<()> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default() += 1;
        if self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(op)
        {
            return Err(BackendError::Transport(format!("injected failure in {op}")));
        }
        Ok(())
    }

    /// Number of times `op` (a trait method name) has been called.
    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Make the next call to `op` fail with a transport error.
    pub fn fail_next(&self, op: &'static str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    /// Register a long name as owned by the mounting user.
    pub fn register_long_name(&self, long_name: &str) {
        self.state().owned.insert(long_name.to_string());
    }

    /// Publish a service on any long name, owned or not.
    pub fn publish_service(&self, long_name: &str, service: &str, home_dir: &str) {
        self.state()
            .services
            .entry(long_name.to_string())
            .or_default()
            .insert(service.to_string(), home_dir.to_string());
    }

    /// Body of a stored object, bypassing call accounting.
    pub fn peek_file(&self, root: RootPath, path: &str) -> Option<Vec<u8>> {
        let state = self.state();
        let segments = segments(path);
        let (name, parents) = segments.split_last()?;
        state
            .root(root)
            .dir(parents)?
            .files
            .get(*name)
            .map(|f| f.body.clone())
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl SafeBackend for MemoryBackend {
    async fn get_directory(&self, root: RootPath, path: &str) -> BackendResult<DirectoryListing> {
        self.record("get_directory")?;
        let state = self.state();
        let segments = segments(path);
        let dir = state
            .root(root)
            .dir(&segments)
            .ok_or_else(|| BackendError::not_found(path))?;
        Ok(dir.listing(segments.last().copied().unwrap_or("/")))
    }

    async fn create_directory(
        &self,
        root: RootPath,
        path: &str,
        is_private: bool,
    ) -> BackendResult<()> {
        self.record("create_directory")?;
        let mut state = self.state();
        let (parent, name) = state.parent_mut(root, path)?;
        if parent.contains(name) {
            return Err(BackendError::AlreadyExists { path: path.into() });
        }
        parent.dirs.insert(name.to_string(), MemDir::new(is_private));
        parent.modified_on = now_rfc3339();
        Ok(())
    }

    async fn delete_directory(&self, root: RootPath, path: &str) -> BackendResult<()> {
        self.record("delete_directory")?;
        let mut state = self.state();
        let (parent, name) = state.parent_mut(root, path)?;
        parent
            .dirs
            .remove(name)
            .ok_or_else(|| BackendError::not_found(path))?;
        parent.modified_on = now_rfc3339();
        Ok(())
    }

    async fn rename_directory(
        &self,
        root: RootPath,
        path: &str,
        new_name: &str,
    ) -> BackendResult<()> {
        self.record("rename_directory")?;
        let mut state = self.state();
        let (parent, name) = state.parent_mut(root, path)?;
        if parent.contains(new_name) {
            return Err(BackendError::AlreadyExists {
                path: new_name.into(),
            });
        }
        let mut dir = parent
            .dirs
            .remove(name)
            .ok_or_else(|| BackendError::not_found(path))?;
        dir.modified_on = now_rfc3339();
        parent.dirs.insert(new_name.to_string(), dir);
        Ok(())
    }

    async fn move_directory(
        &self,
        root: RootPath,
        path: &str,
        dest_root: RootPath,
        dest_dir: &str,
    ) -> BackendResult<()> {
        self.record("move_directory")?;
        let mut state = self.state();
        let dest_segments = segments(dest_dir);
        let (parent, name) = state.parent_mut(root, path)?;
        let name = name.to_string();
        let dir = parent
            .dirs
            .remove(&name)
            .ok_or_else(|| BackendError::not_found(path))?;
        let Some(dest) = state.root_mut(dest_root).dir_mut(&dest_segments) else {
            // put it back before reporting
            if let Ok((parent, _)) = state.parent_mut(root, path) {
                parent.dirs.insert(name, dir);
            }
            return Err(BackendError::not_found(dest_dir));
        };
        if dest.contains(&name) {
            let conflict = format!("{dest_dir}/{name}");
            if let Ok((parent, _)) = state.parent_mut(root, path) {
                parent.dirs.insert(name, dir);
            }
            return Err(BackendError::AlreadyExists { path: conflict });
        }
        dest.dirs.insert(name, dir);
        Ok(())
    }

    async fn get_file(&self, root: RootPath, path: &str) -> BackendResult<Vec<u8>> {
        self.record("get_file")?;
        let state = self.state();
        let segments = segments(path);
        let (name, parents) = segments
            .split_last()
            .ok_or_else(|| BackendError::not_found(path))?;
        state
            .root(root)
            .dir(parents)
            .and_then(|d| d.files.get(*name))
            .map(|f| f.body.clone())
            .ok_or_else(|| BackendError::not_found(path))
    }

    async fn create_file(
        &self,
        root: RootPath,
        path: &str,
        body: &[u8],
        is_private: bool,
    ) -> BackendResult<()> {
        self.record("create_file")?;
        if body.is_empty() {
            return Err(BackendError::EmptyBody { path: path.into() });
        }
        let mut state = self.state();
        let (parent, name) = state.parent_mut(root, path)?;
        if parent.contains(name) {
            return Err(BackendError::AlreadyExists { path: path.into() });
        }
        let now = now_rfc3339();
        parent.files.insert(
            name.to_string(),
            MemFile {
                body: body.to_vec(),
                is_private,
                created_on: now.clone(),
                modified_on: now.clone(),
            },
        );
        parent.modified_on = now;
        Ok(())
    }

    async fn delete_file(&self, root: RootPath, path: &str) -> BackendResult<()> {
        self.record("delete_file")?;
        let mut state = self.state();
        let (parent, name) = state.parent_mut(root, path)?;
        parent
            .files
            .remove(name)
            .ok_or_else(|| BackendError::not_found(path))?;
        parent.modified_on = now_rfc3339();
        Ok(())
    }

    async fn rename_file(&self, root: RootPath, path: &str, new_name: &str) -> BackendResult<()> {
        self.record("rename_file")?;
        let mut state = self.state();
        let (parent, name) = state.parent_mut(root, path)?;
        if parent.contains(new_name) {
            return Err(BackendError::AlreadyExists {
                path: new_name.into(),
            });
        }
        let mut file = parent
            .files
            .remove(name)
            .ok_or_else(|| BackendError::not_found(path))?;
        file.modified_on = now_rfc3339();
        parent.files.insert(new_name.to_string(), file);
        Ok(())
    }

    async fn move_file(
        &self,
        root: RootPath,
        path: &str,
        dest_root: RootPath,
        dest_dir: &str,
    ) -> BackendResult<()> {
        self.record("move_file")?;
        let mut state = self.state();
        let dest_segments = segments(dest_dir);
        let dest_ok = state
            .root(dest_root)
            .dir(&dest_segments)
            .ok_or_else(|| BackendError::not_found(dest_dir))?
            .contains(segments(path).last().copied().unwrap_or_default());
        if dest_ok {
            return Err(BackendError::AlreadyExists {
                path: dest_dir.into(),
            });
        }
        let (parent, name) = state.parent_mut(root, path)?;
        let name = name.to_string();
        let file = parent
            .files
            .remove(&name)
            .ok_or_else(|| BackendError::not_found(path))?;
        if let Some(dest) = state.root_mut(dest_root).dir_mut(&dest_segments) {
            dest.files.insert(name, file);
        }
        Ok(())
    }

    async fn list_long_names(&self) -> BackendResult<Vec<String>> {
        self.record("list_long_names")?;
        Ok(self.state().owned.iter().cloned().collect())
    }

    async fn list_services(&self, long_name: &str) -> BackendResult<Vec<String>> {
        self.record("list_services")?;
        let state = self.state();
        if !state.owned.contains(long_name) && !state.services.contains_key(long_name) {
            return Err(BackendError::not_found(long_name));
        }
        Ok(state
            .services
            .get(long_name)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_home_dir(
        &self,
        long_name: &str,
        service: &str,
    ) -> BackendResult<DirectoryListing> {
        self.record("get_home_dir")?;
        let state = self.state();
        let home = state
            .services
            .get(long_name)
            .and_then(|s| s.get(service))
            .ok_or_else(|| BackendError::not_found(format!("{service}.{long_name}")))?;
        let segments = segments(home);
        let dir = state
            .drive
            .dir(&segments)
            .ok_or_else(|| BackendError::not_found(home.clone()))?;
        Ok(dir.listing(segments.last().copied().unwrap_or("/")))
    }

    async fn get_file_unauth(
        &self,
        long_name: &str,
        service: &str,
        path: &str,
    ) -> BackendResult<Vec<u8>> {
        self.record("get_file_unauth")?;
        let state = self.state();
        let home = state
            .services
            .get(long_name)
            .and_then(|s| s.get(service))
            .ok_or_else(|| BackendError::not_found(format!("{service}.{long_name}")))?;
        let mut full = segments(home);
        full.extend(segments(path));
        let (name, parents) = full
            .split_last()
            .ok_or_else(|| BackendError::not_found(path))?;
        state
            .drive
            .dir(parents)
            .and_then(|d| d.files.get(*name))
            .map(|f| f.body.clone())
            .ok_or_else(|| BackendError::not_found(path))
    }

    async fn add_service(
        &self,
        long_name: &str,
        service: &str,
        home_dir: &str,
    ) -> BackendResult<()> {
        self.record("add_service")?;
        let mut state = self.state();
        if !state.owned.contains(long_name) {
            return Err(BackendError::not_found(long_name));
        }
        if state.drive.dir(&segments(home_dir)).is_none() {
            return Err(BackendError::not_found(home_dir));
        }
        let services = state.services.entry(long_name.to_string()).or_default();
        if services.contains_key(service) {
            return Err(BackendError::AlreadyExists {
                path: format!("{service}.{long_name}"),
            });
        }
        services.insert(service.to_string(), home_dir.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_rejects_empty_body_and_duplicates() {
        let backend = MemoryBackend::new();
        backend
            .create_directory(RootPath::Drive, "/docs", false)
            .await
            .unwrap();

        let err = backend
            .create_file(RootPath::Drive, "/docs/a.txt", b"", false)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyBody { .. }));

        backend
            .create_file(RootPath::Drive, "/docs/a.txt", b"x", false)
            .await
            .unwrap();
        // same name is refused whatever the privacy flag
        let err = backend
            .create_directory(RootPath::Drive, "/docs/a.txt", true)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists { .. }));
        assert_eq!(backend.calls("create_file"), 2);
    }

    #[tokio::test]
    async fn test_memory_backend_listing_and_moves() {
        let backend = MemoryBackend::new();
        backend
            .create_directory(RootPath::Drive, "/a", false)
            .await
            .unwrap();
        backend
            .create_directory(RootPath::Drive, "/b", true)
            .await
            .unwrap();
        backend
            .create_file(RootPath::Drive, "/a/f", b"data", true)
            .await
            .unwrap();

        let root = backend.get_directory(RootPath::Drive, "/").await.unwrap();
        assert_eq!(root.sub_directories.len(), 2);
        assert!(root.sub_directories.iter().any(|d| d.name == "b" && d.is_private));

        backend
            .move_file(RootPath::Drive, "/a/f", RootPath::Drive, "/b")
            .await
            .unwrap();
        backend
            .rename_file(RootPath::Drive, "/b/f", "g")
            .await
            .unwrap();
        assert_eq!(
            backend.peek_file(RootPath::Drive, "/b/g").as_deref(),
            Some(&b"data"[..])
        );
        assert!(
            backend
                .get_directory(RootPath::Drive, "/missing")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_memory_backend_services_and_injected_failure() {
        let backend = MemoryBackend::new();
        backend.register_long_name("example");
        backend
            .create_directory(RootPath::Drive, "/www", false)
            .await
            .unwrap();
        backend
            .create_file(RootPath::Drive, "/www/index.html", b"<html>", false)
            .await
            .unwrap();
        backend.add_service("example", "www", "/www").await.unwrap();

        let home = backend.get_home_dir("example", "www").await.unwrap();
        assert_eq!(home.info.name, "www");
        assert_eq!(home.files[0].name, "index.html");
        let body = backend
            .get_file_unauth("example", "www", "/index.html")
            .await
            .unwrap();
        assert_eq!(body, b"<html>");

        backend.fail_next("list_long_names");
        assert!(matches!(
            backend.list_long_names().await,
            Err(BackendError::Transport(_))
        ));
        assert_eq!(backend.list_long_names().await.unwrap(), vec!["example"]);
    }
}
