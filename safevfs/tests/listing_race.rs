use async_trait::async_trait;
use safevfs::SafeVfs;
use safevfs::cadapter::memory::MemoryBackend;
use safevfs::cadapter::{BackendResult, DirectoryListing, RootPath, SafeBackend};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

const MOUNT: &str = "/mnt/safe";

/// Holds the first listing of one directory after its snapshot was taken.
struct GatedBackend {
    inner: MemoryBackend,
    gated: &'static str,
    armed: AtomicBool,
    fetched: Notify,
    release: Notify,
}

impl GatedBackend {
    fn new(gated: &'static str) -> Self {
        Self {
            inner: MemoryBackend::new(),
            gated,
            armed: AtomicBool::new(true),
            fetched: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl SafeBackend for GatedBackend {
    async fn get_directory(&self, root: RootPath, path: &str) -> BackendResult<DirectoryListing> {
        let listing = self.inner.get_directory(root, path).await;
        if path == self.gated && self.armed.swap(false, Ordering::SeqCst) {
            self.fetched.notify_one();
            self.release.notified().await;
        }
        listing
    }

    async fn create_directory(
        &self,
        root: RootPath,
        path: &str,
        is_private: bool,
    ) -> BackendResult<()> {
        self.inner.create_directory(root, path, is_private).await
    }

    async fn delete_directory(&self, root: RootPath, path: &str) -> BackendResult<()> {
        self.inner.delete_directory(root, path).await
    }

    async fn rename_directory(
        &self,
        root: RootPath,
        path: &str,
        new_name: &str,
    ) -> BackendResult<()> {
        self.inner.rename_directory(root, path, new_name).await
    }

    async fn move_directory(
        &self,
        root: RootPath,
        path: &str,
        dest_root: RootPath,
        dest_dir: &str,
    ) -> BackendResult<()> {
        self.inner
            .move_directory(root, path, dest_root, dest_dir)
            .await
    }

    async fn get_file(&self, root: RootPath, path: &str) -> BackendResult<Vec<u8>> {
        self.inner.get_file(root, path).await
    }

    async fn create_file(
        &self,
        root: RootPath,
        path: &str,
        body: &[u8],
        is_private: bool,
    ) -> BackendResult<()> {
        self.inner.create_file(root, path, body, is_private).await
    }

    async fn delete_file(&self, root: RootPath, path: &str) -> BackendResult<()> {
        self.inner.delete_file(root, path).await
    }

    async fn rename_file(&self, root: RootPath, path: &str, new_name: &str) -> BackendResult<()> {
        self.inner.rename_file(root, path, new_name).await
    }

    async fn move_file(
        &self,
        root: RootPath,
        path: &str,
        dest_root: RootPath,
        dest_dir: &str,
    ) -> BackendResult<()> {
        self.inner.move_file(root, path, dest_root, dest_dir).await
    }

    async fn list_long_names(&self) -> BackendResult<Vec<String>> {
        self.inner.list_long_names().await
    }

    async fn list_services(&self, long_name: &str) -> BackendResult<Vec<String>> {
        self.inner.list_services(long_name).await
    }

    async fn get_home_dir(
        &self,
        long_name: &str,
        service: &str,
    ) -> BackendResult<DirectoryListing> {
        self.inner.get_home_dir(long_name, service).await
    }

    async fn get_file_unauth(
        &self,
        long_name: &str,
        service: &str,
        path: &str,
    ) -> BackendResult<Vec<u8>> {
        self.inner.get_file_unauth(long_name, service, path).await
    }

    async fn add_service(
        &self,
        long_name: &str,
        service: &str,
        home_dir: &str,
    ) -> BackendResult<()> {
        self.inner.add_service(long_name, service, home_dir).await
    }
}

async fn make_gated_vfs(gated: &'static str) -> (SafeVfs, Arc<GatedBackend>) {
    let backend = Arc::new(GatedBackend::new(gated));
    backend
        .inner
        .create_directory(RootPath::Drive, gated, false)
        .await
        .unwrap();
    backend
        .inner
        .create_file(RootPath::Drive, &format!("{gated}/old"), b"1", false)
        .await
        .unwrap();
    (SafeVfs::new(backend.clone(), MOUNT), backend)
}

#[tokio::test]
async fn test_listing_older_than_a_mutation_is_not_trusted() {
    let (vfs, backend) = make_gated_vfs("/a").await;

    let slow = vfs.contents("/public/a");
    let racer = async {
        backend.fetched.notified().await;
        // lands after the slow listing took its snapshot
        vfs.mkdir("/public/a/sub").await.unwrap();
        // re-listing the parent recreates the node for /a
        assert_eq!(vfs.contents("/public").await.unwrap(), vec!["a"]);
        backend.release.notify_one();
    };
    let (snapshot, ()) = tokio::join!(slow, racer);
    assert_eq!(snapshot.unwrap(), vec!["old"]);

    assert_eq!(vfs.contents("/public/a").await.unwrap(), vec!["old", "sub"]);
    assert!(vfs.is_directory("/public/a/sub").await.unwrap());
}

#[tokio::test]
async fn test_listing_without_interference_is_cached() {
    let (vfs, backend) = make_gated_vfs("/b").await;

    let slow = vfs.contents("/public/b");
    let release = async {
        backend.fetched.notified().await;
        backend.release.notify_one();
    };
    let (snapshot, ()) = tokio::join!(slow, release);
    assert_eq!(snapshot.unwrap(), vec!["old"]);

    let calls = backend.inner.calls("get_directory");
    assert_eq!(vfs.contents("/public/b").await.unwrap(), vec!["old"]);
    assert_eq!(backend.inner.calls("get_directory"), calls);
}
