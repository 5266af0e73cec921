//! `SafeVfs`: the path-based filesystem surface.
//!
//! Owns the shared namespace caches, the handle table and the created-file
//! overlay, and routes each call to the component that implements it.

use super::attr::{AttributeResolver, Attributes, Times};
use super::cache::{EntryKind, NamespaceCaches};
use super::handle::StagedFiles;
use super::lister::Lister;
use super::mutation::MutationCoordinator;
use super::path::{self, Namespace, OpenMode, VirtualPath};
use super::settings::SettingsStore;
use crate::cadapter::SafeBackend;
use crate::error::{VfsError, VfsResult};
use std::sync::Arc;

pub struct SafeVfs {
    mount_point: String,
    lister: Arc<Lister>,
    attrs: Arc<AttributeResolver>,
    mutations: MutationCoordinator,
    files: StagedFiles,
}

impl SafeVfs {
    /// `mount_point` is the absolute directory the filesystem is mounted on;
    /// it prefixes absolute symlink targets.
    pub fn new(backend: Arc<dyn SafeBackend>, mount_point: impl Into<String>) -> Self {
        let mount_point = mount_point.into().trim_end_matches('/').to_string();
        let caches = Arc::new(NamespaceCaches::new());
        let settings = Arc::new(SettingsStore::new(backend.clone()));
        let lister = Arc::new(Lister::new(
            backend.clone(),
            caches.clone(),
            settings.clone(),
            mount_point.clone(),
        ));
        let attrs = Arc::new(AttributeResolver::new(caches.clone(), lister.clone()));
        let mutations = MutationCoordinator::new(
            backend.clone(),
            caches.clone(),
            lister.clone(),
            attrs.clone(),
            settings,
            mount_point.clone(),
        );
        let files = StagedFiles::new(backend, caches, lister.clone(), attrs.clone());
        Self {
            mount_point,
            lister,
            attrs,
            mutations,
            files,
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub async fn getattr(&self, path: &str) -> VfsResult<Attributes> {
        if let Some(size) = self.files.pending_size(path).await {
            let (uid, gid) = self.attrs.owner();
            return Ok(Attributes {
                kind: EntryKind::File,
                perm: 0o666,
                size,
                nlink: 1,
                uid,
                gid,
                times: Times::default(),
            });
        }
        self.attrs.attributes(path).await
    }

    /// Child names of a directory; `/` lists the namespaces.
    pub async fn contents(&self, path: &str) -> VfsResult<Vec<String>> {
        match VirtualPath::parse(path)? {
            VirtualPath::Root => Ok(Namespace::ALL
                .iter()
                .map(|ns| ns.as_str().to_string())
                .collect()),
            vpath => {
                let namespace = vpath.namespace().unwrap_or(Namespace::Public);
                self.lister.contents(namespace, &vpath.relative()).await
            }
        }
    }

    pub async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        self.contents(path).await
    }

    pub async fn is_file(&self, path: &str) -> VfsResult<bool> {
        self.attrs.file_exists(path).await
    }

    pub async fn is_directory(&self, path: &str) -> VfsResult<bool> {
        self.attrs.directory_exists(path).await
    }

    pub async fn is_symlink(&self, path: &str) -> VfsResult<bool> {
        self.attrs.is_symlink(path).await
    }

    pub async fn times(&self, path: &str) -> VfsResult<Times> {
        self.attrs.times(path).await
    }

    pub async fn size(&self, path: &str) -> VfsResult<u64> {
        if let Some(size) = self.files.pending_size(path).await {
            return Ok(size);
        }
        self.attrs.size(path).await
    }

    pub fn can_write(&self, path: &str) -> bool {
        path::can_write(path)
    }

    pub fn can_delete(&self, path: &str) -> bool {
        path::can_delete(path)
    }

    pub fn can_mkdir(&self, path: &str) -> bool {
        path::can_mkdir(path)
    }

    pub fn can_rmdir(&self, path: &str) -> bool {
        path::can_rmdir(path)
    }

    pub async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.mutations.mkdir(path).await
    }

    pub async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.mutations.rmdir(path).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.mutations.rename(from, to).await
    }

    pub async fn symlink(&self, target: &str, link: &str) -> VfsResult<()> {
        self.mutations.symlink(target, link).await
    }

    pub async fn readlink(&self, path: &str) -> VfsResult<String> {
        self.mutations.readlink(path).await
    }

    pub async fn delete(&self, path: &str) -> VfsResult<()> {
        self.mutations.delete(path).await
    }

    pub async fn touch(&self, path: &str) -> VfsResult<()> {
        self.mutations.touch(path).await
    }

    pub async fn raw_open(&self, path: &str, mode: OpenMode) -> VfsResult<u64> {
        if self.attrs.directory_exists(path).await? {
            return Err(VfsError::denied(path, "is a directory"));
        }
        self.files.open(path, mode).await
    }

    pub async fn create(&self, path: &str, mode: OpenMode) -> VfsResult<u64> {
        self.files.create(path, mode).await
    }

    pub async fn raw_read(&self, fh: u64, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        self.files.read(fh, offset, size).await
    }

    pub async fn raw_write(&self, fh: u64, offset: u64, data: &[u8]) -> VfsResult<usize> {
        self.files.write(fh, offset, data).await
    }

    pub async fn raw_close(&self, fh: u64) -> VfsResult<()> {
        self.files.close(fh).await
    }

    /// Resize through `fh` when the file is open, otherwise by a one-shot rewrite.
    pub async fn truncate(&self, path: &str, fh: Option<u64>, size: u64) -> VfsResult<()> {
        match fh {
            Some(fh) => self.files.truncate(fh, size).await,
            None => self.files.truncate_path(path, size).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;
    use crate::cadapter::RootPath;

    #[tokio::test]
    async fn test_root_and_namespace_listing() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_directory(RootPath::Drive, "/docs", false)
            .await
            .unwrap();
        let vfs = SafeVfs::new(backend, "/mnt/safe/");
        assert_eq!(vfs.mount_point(), "/mnt/safe");
        assert_eq!(
            vfs.contents("/").await.unwrap(),
            vec!["public", "private", "outside", "dns"]
        );
        assert_eq!(vfs.readdir("/public").await.unwrap(), vec!["docs"]);
        assert!(vfs.contents("/private").await.unwrap().is_empty());
        assert!(matches!(
            vfs.contents("/home").await,
            Err(VfsError::UnknownNamespace { .. })
        ));
    }

    #[tokio::test]
    async fn test_getattr_sees_created_files() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_directory(RootPath::Drive, "/docs", false)
            .await
            .unwrap();
        let vfs = SafeVfs::new(backend, "/mnt/safe");

        let fh = vfs.create("/public/docs/new", OpenMode::Truncate).await.unwrap();
        vfs.raw_write(fh, 0, b"1234").await.unwrap();
        let attr = vfs.getattr("/public/docs/new").await.unwrap();
        assert_eq!((attr.kind, attr.size), (EntryKind::File, 4));
        assert_eq!(vfs.size("/public/docs/new").await.unwrap(), 4);

        vfs.truncate("/public/docs/new", Some(fh), 2).await.unwrap();
        vfs.raw_close(fh).await.unwrap();
        assert_eq!(vfs.size("/public/docs/new").await.unwrap(), 2);
        assert!(matches!(
            vfs.raw_open("/public/docs", OpenMode::Read).await,
            Err(VfsError::PermissionDenied { .. })
        ));
    }
}
