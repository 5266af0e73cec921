//! Staged file handles.
//!
//! The backend only stores whole objects, so an open file is staged in an
//! anonymous temp file. The remote body is fetched on the first read (or before
//! the first write for read-modify-write modes) and written back on close by
//! deleting the old object and creating a new one.

use super::attr::AttributeResolver;
use super::cache::NamespaceCaches;
use super::lister::Lister;
use super::path::{self, ExternalDomain, Namespace, OpenMode, VirtualPath};
use crate::cadapter::{BackendError, RootPath, SafeBackend};
use crate::error::{VfsError, VfsResult};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

pub struct StagedFile {
    fh: u64,
    path: String,
    namespace: Namespace,
    parent: String,
    name: String,
    mode: OpenMode,
    domain: Option<ExternalDomain>,
    buffer: Option<File>,
    len: u64,
    contents_loaded: bool,
    contents_changed: bool,
}

impl StagedFile {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn buffer(&mut self) -> VfsResult<&mut File> {
        let fh = self.fh;
        self.buffer.as_mut().ok_or(VfsError::BadHandle { fh })
    }

    /// Fetch the remote body into the buffer once.
    async fn load(&mut self, backend: &dyn SafeBackend) -> VfsResult<()> {
        if self.contents_loaded {
            return Ok(());
        }
        let fetched = match &self.domain {
            Some(domain) => {
                backend
                    .get_file_unauth(
                        &domain.long_name,
                        &domain.service,
                        &path::join("/", &self.name),
                    )
                    .await
            }
            None => {
                backend
                    .get_file(RootPath::Drive, &path::join(&self.parent, &self.name))
                    .await
            }
        };
        let body = match fetched {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Err(VfsError::not_found(&self.path)),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %self.path, bytes = body.len(), "staged remote body");
        let buffer = self.buffer()?;
        buffer.set_len(0).await?;
        buffer.seek(SeekFrom::Start(0)).await?;
        buffer.write_all(&body).await?;
        self.len = body.len() as u64;
        self.contents_loaded = true;
        Ok(())
    }

    async fn read_at(&mut self, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        if offset >= self.len {
            return Ok(Vec::new());
        }
        let want = u64::from(size).min(self.len - offset);
        let buffer = self.buffer()?;
        buffer.seek(SeekFrom::Start(offset)).await?;
        let mut out = Vec::with_capacity(want as usize);
        buffer.take(want).read_to_end(&mut out).await?;
        Ok(out)
    }

    async fn write_at(&mut self, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let offset = if self.mode == OpenMode::Append {
            self.len
        } else {
            offset
        };
        let buffer = self.buffer()?;
        buffer.seek(SeekFrom::Start(offset)).await?;
        buffer.write_all(data).await?;
        self.len = self.len.max(offset + data.len() as u64);
        self.contents_changed = true;
        Ok(data.len())
    }

    async fn resize(&mut self, size: u64) -> VfsResult<()> {
        self.buffer()?.set_len(size).await?;
        self.len = size;
        self.contents_changed = true;
        Ok(())
    }

    /// Take the buffer out of the handle and return its whole content.
    async fn drain(&mut self) -> VfsResult<Vec<u8>> {
        let fh = self.fh;
        let mut buffer = self.buffer.take().ok_or(VfsError::BadHandle { fh })?;
        buffer.seek(SeekFrom::Start(0)).await?;
        let mut body = Vec::with_capacity(self.len as usize);
        buffer.read_to_end(&mut body).await?;
        Ok(body)
    }
}

type SharedFile = Arc<AsyncMutex<StagedFile>>;

/// Open handles plus the overlay of files created but not yet closed.
pub struct StagedFiles {
    backend: Arc<dyn SafeBackend>,
    caches: Arc<NamespaceCaches>,
    lister: Arc<Lister>,
    attrs: Arc<AttributeResolver>,
    handles: Mutex<HashMap<u64, SharedFile>>,
    created: Mutex<HashMap<String, u64>>,
    next_fh: AtomicU64,
}

impl StagedFiles {
    pub fn new(
        backend: Arc<dyn SafeBackend>,
        caches: Arc<NamespaceCaches>,
        lister: Arc<Lister>,
        attrs: Arc<AttributeResolver>,
    ) -> Self {
        Self {
            backend,
            caches,
            lister,
            attrs,
            handles: Mutex::new(HashMap::new()),
            created: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<u64, SharedFile>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn created(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, fh: u64) -> VfsResult<SharedFile> {
        self.handles()
            .get(&fh)
            .cloned()
            .ok_or(VfsError::BadHandle { fh })
    }

    pub async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<u64> {
        let VirtualPath::Entry {
            namespace,
            parent,
            name,
        } = VirtualPath::parse(path)?
        else {
            return Err(VfsError::denied(path, "not a file"));
        };
        if mode.writes() && !path::can_write(path) {
            return Err(VfsError::denied(path, "files here are read-only"));
        }
        let domain = match namespace {
            Namespace::Public | Namespace::Private => None,
            Namespace::Outside if path::depth(&parent) == 1 => Some(ExternalDomain::parse(
                path::first_segment(&parent).unwrap_or_default(),
            )?),
            _ => return Err(VfsError::denied(path, "not a file")),
        };

        let buffer = File::from_std(tempfile::tempfile()?);
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let truncating = mode == OpenMode::Truncate;
        let staged = StagedFile {
            fh,
            path: path.to_string(),
            namespace,
            parent,
            name,
            mode,
            domain,
            buffer: Some(buffer),
            len: 0,
            // an O_TRUNC open already knows the new content: nothing
            contents_loaded: truncating,
            contents_changed: truncating,
        };
        self.handles().insert(fh, Arc::new(AsyncMutex::new(staged)));
        debug!(fh, path, ?mode, "opened staged handle");
        Ok(fh)
    }

    /// Open a new file and report it through [`Self::pending_size`] until closed.
    pub async fn create(&self, path: &str, mode: OpenMode) -> VfsResult<u64> {
        if !path::can_write(path) {
            return Err(VfsError::denied(path, "files cannot be created here"));
        }
        if self.attrs.file_exists(path).await? {
            return Err(VfsError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let fh = self.open(path, mode).await?;
        {
            let file = self.get(fh)?;
            // nothing remote to stage yet
            file.lock().await.contents_loaded = true;
        }
        self.created().insert(path.to_string(), fh);
        Ok(fh)
    }

    /// Current buffer length of a created, not yet closed file.
    pub async fn pending_size(&self, path: &str) -> Option<u64> {
        let fh = *self.created().get(path)?;
        let file = self.get(fh).ok()?;
        let len = file.lock().await.len();
        Some(len)
    }

    pub async fn read(&self, fh: u64, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let file = self.get(fh)?;
        let mut file = file.lock().await;
        file.load(self.backend.as_ref()).await?;
        file.read_at(offset, size).await
    }

    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let file = self.get(fh)?;
        let mut file = file.lock().await;
        if !file.mode.writes() {
            return Err(VfsError::denied(&file.path, "handle was opened read-only"));
        }
        if file.mode.preloads() {
            file.load(self.backend.as_ref()).await?;
        }
        file.write_at(offset, data).await
    }

    pub async fn truncate(&self, fh: u64, size: u64) -> VfsResult<()> {
        let file = self.get(fh)?;
        let mut file = file.lock().await;
        if !file.mode.writes() {
            return Err(VfsError::denied(&file.path, "handle was opened read-only"));
        }
        if size == 0 {
            file.contents_loaded = true;
        } else {
            file.load(self.backend.as_ref()).await?;
        }
        file.resize(size).await
    }

    /// Resize a file that has no open handle through a one-shot staged rewrite.
    pub async fn truncate_path(&self, path: &str, size: u64) -> VfsResult<()> {
        if !self.attrs.file_exists(path).await? {
            return Err(VfsError::not_found(path));
        }
        let fh = self.open(path, OpenMode::Update).await?;
        match self.truncate(fh, size).await {
            Ok(()) => self.close(fh).await,
            Err(e) => {
                self.discard(fh);
                Err(e)
            }
        }
    }

    /// Drop a handle without writing anything back.
    pub fn discard(&self, fh: u64) {
        if let Some(file) = self.handles().remove(&fh) {
            self.created().retain(|_, v| *v != fh);
            drop(file);
        }
    }

    pub async fn close(&self, fh: u64) -> VfsResult<()> {
        let file = self
            .handles()
            .remove(&fh)
            .ok_or(VfsError::BadHandle { fh })?;
        self.created().retain(|_, v| *v != fh);
        let mut file = file.lock().await;
        let remote = path::join(&file.parent, &file.name);

        if !file.contents_changed {
            file.buffer.take();
            if file.is_empty()
                && file.mode.writes()
                && !self.attrs.file_exists(&file.path).await?
            {
                self.backend
                    .create_file(
                        RootPath::Drive,
                        &remote,
                        path::EMPTY_BODY,
                        file.namespace.is_private(),
                    )
                    .await?;
                self.refresh(&file).await;
            }
            return Ok(());
        }

        let body = file.drain().await?;
        let deleted = match self.backend.delete_file(RootPath::Drive, &remote).await {
            Ok(()) => true,
            Err(BackendError::NotFound { .. }) => false,
            Err(e) => return Err(e.into()),
        };
        let stored = self
            .backend
            .create_file(
                RootPath::Drive,
                &remote,
                path::storable_body(&body),
                file.namespace.is_private(),
            )
            .await;
        match stored {
            Ok(()) => {}
            Err(source) if deleted => {
                self.caches.invalidate_drive(&file.parent);
                return Err(VfsError::PartialRewrite {
                    path: file.path.clone(),
                    source,
                });
            }
            Err(e) => return Err(e.into()),
        }
        debug!(fh, path = %file.path, bytes = body.len(), "flushed staged handle");
        self.refresh(&file).await;
        Ok(())
    }

    async fn refresh(&self, file: &StagedFile) {
        self.caches.invalidate_drive(&file.parent);
        if let Err(e) = self.lister.list(file.namespace, &file.parent).await {
            warn!(path = %file.path, error = %e, "re-listing after close failed");
        }
    }
}
