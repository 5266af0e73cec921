use super::cache::{Entry, EntryKind, NamespaceCaches};
use super::lister::Lister;
use super::path::{self, VirtualPath, WRITE_PROBE};
use crate::error::{VfsError, VfsResult};
use chrono::DateTime;
use std::sync::Arc;

/// Seconds since the epoch; zero when the backend gave nothing usable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Times {
    pub accessed: i64,
    pub modified: i64,
    pub created: i64,
}

impl Times {
    fn from_entry(entry: &Entry) -> Self {
        let parse = |s: &Option<String>| {
            s.as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.timestamp())
        };
        match (parse(&entry.modified_on), parse(&entry.created_on)) {
            (Some(modified), Some(created)) => Self {
                accessed: modified,
                modified,
                created,
            },
            _ => Self::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub kind: EntryKind,
    pub perm: u16,
    pub size: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub times: Times,
}

/// Resolves existence and attributes, listing the parent when its node is stale.
pub struct AttributeResolver {
    caches: Arc<NamespaceCaches>,
    lister: Arc<Lister>,
    uid: u32,
    gid: u32,
}

impl AttributeResolver {
    pub fn new(caches: Arc<NamespaceCaches>, lister: Arc<Lister>) -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            caches,
            lister,
            uid,
            gid,
        }
    }

    pub fn owner(&self) -> (u32, u32) {
        (self.uid, self.gid)
    }

    /// Kind and cached entry of `path`; `None` for paths that do not exist.
    pub async fn lookup(&self, path: &VirtualPath) -> VfsResult<Option<(EntryKind, Entry)>> {
        let VirtualPath::Entry {
            namespace,
            parent,
            name,
        } = path
        else {
            return Ok(Some((EntryKind::Folder, Entry::default())));
        };
        self.lister.ensure_listed(*namespace, parent).await?;
        let tree = self.caches.tree(*namespace);
        Ok(tree.lookup(parent, name).map(|(kind, e)| (kind, e.clone())))
    }

    async fn kind_of(&self, path: &str) -> VfsResult<Option<EntryKind>> {
        let path = VirtualPath::parse(path)?;
        Ok(self.lookup(&path).await?.map(|(kind, _)| kind))
    }

    /// True for regular files and symlinks.
    pub async fn file_exists(&self, path: &str) -> VfsResult<bool> {
        Ok(matches!(
            self.kind_of(path).await?,
            Some(EntryKind::File | EntryKind::Symlink)
        ))
    }

    pub async fn directory_exists(&self, path: &str) -> VfsResult<bool> {
        Ok(self.kind_of(path).await? == Some(EntryKind::Folder))
    }

    pub async fn is_symlink(&self, path: &str) -> VfsResult<bool> {
        Ok(self.kind_of(path).await? == Some(EntryKind::Symlink))
    }

    pub async fn times(&self, path: &str) -> VfsResult<Times> {
        let path = VirtualPath::parse(path)?;
        Ok(self
            .lookup(&path)
            .await?
            .map(|(_, entry)| Times::from_entry(&entry))
            .unwrap_or_default())
    }

    pub async fn size(&self, path: &str) -> VfsResult<u64> {
        let vpath = VirtualPath::parse(path)?;
        match self.lookup(&vpath).await? {
            Some((EntryKind::File | EntryKind::Symlink, entry)) => Ok(entry.size),
            _ => Err(VfsError::not_found(path)),
        }
    }

    /// `getattr` semantics. Unknown top-level names read as missing.
    pub async fn attributes(&self, path: &str) -> VfsResult<Attributes> {
        let vpath = match VirtualPath::parse(path) {
            Ok(p) => p,
            Err(VfsError::UnknownNamespace { .. }) => return Err(VfsError::not_found(path)),
            Err(e) => return Err(e),
        };
        let Some((kind, entry)) = self.lookup(&vpath).await? else {
            return Err(VfsError::not_found(path));
        };
        let perm = match kind {
            EntryKind::Folder => {
                let probe = path::join(path.trim_end_matches('/'), WRITE_PROBE);
                if path::can_mkdir(&probe) || path::can_write(&probe) {
                    0o777
                } else {
                    0o555
                }
            }
            EntryKind::File if path::can_write(path) => 0o666,
            EntryKind::File => 0o444,
            EntryKind::Symlink => 0o777,
        };
        Ok(Attributes {
            kind,
            perm,
            size: match kind {
                EntryKind::Folder => 0,
                _ => entry.size,
            },
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            times: Times::from_entry(&entry),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;
    use crate::cadapter::{RootPath, SafeBackend};
    use crate::vfs::settings::SettingsStore;

    async fn resolver() -> (AttributeResolver, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_directory(RootPath::Drive, "/docs", false)
            .await
            .unwrap();
        backend
            .create_file(RootPath::Drive, "/docs/a.txt", b"hello", false)
            .await
            .unwrap();
        backend
            .create_file(RootPath::Drive, "/top.txt", b"t", false)
            .await
            .unwrap();
        let caches = Arc::new(NamespaceCaches::new());
        let settings = Arc::new(SettingsStore::new(backend.clone()));
        let lister = Arc::new(Lister::new(
            backend.clone(),
            caches.clone(),
            settings,
            "/mnt/safe",
        ));
        (AttributeResolver::new(caches, lister), backend)
    }

    #[tokio::test]
    async fn test_attributes_modes() {
        let (attrs, _) = resolver().await;
        let root = attrs.attributes("/").await.unwrap();
        assert_eq!((root.kind, root.perm), (EntryKind::Folder, 0o555));
        assert_eq!(attrs.attributes("/public").await.unwrap().perm, 0o777);
        assert_eq!(attrs.attributes("/dns").await.unwrap().perm, 0o555);
        assert_eq!(attrs.attributes("/public/docs").await.unwrap().perm, 0o777);

        let file = attrs.attributes("/public/docs/a.txt").await.unwrap();
        assert_eq!((file.kind, file.perm, file.size), (EntryKind::File, 0o666, 5));
        assert_eq!(file.nlink, 1);
        assert_eq!((file.uid, file.gid), attrs.owner());
        assert!(file.times.modified > 0);
        // files directly under /public are read-only
        assert_eq!(attrs.attributes("/public/top.txt").await.unwrap().perm, 0o444);

        assert!(matches!(
            attrs.attributes("/.Trash").await,
            Err(VfsError::NotFound { .. })
        ));
        assert!(matches!(
            attrs.attributes("/private/docs/a.txt").await,
            Err(VfsError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_existence_and_times() {
        let (attrs, backend) = resolver().await;
        assert!(attrs.file_exists("/public/docs/a.txt").await.unwrap());
        assert!(!attrs.directory_exists("/public/docs/a.txt").await.unwrap());
        assert!(attrs.directory_exists("/public/docs").await.unwrap());
        assert_eq!(attrs.size("/public/docs/a.txt").await.unwrap(), 5);
        assert!(attrs.size("/public/docs").await.is_err());
        assert_eq!(
            attrs.times("/public/missing").await.unwrap(),
            Times::default()
        );
        // listing "/" re-creates the "/docs" node, so "/docs" is fetched twice
        assert_eq!(backend.calls("get_directory"), 3);
    }

    #[test]
    fn test_malformed_timestamps_are_zero() {
        let entry = Entry {
            modified_on: Some("yesterday".into()),
            created_on: Some("2024-01-02T03:04:05Z".into()),
            ..Entry::named("x")
        };
        assert_eq!(Times::from_entry(&entry), Times::default());
        let entry = Entry {
            modified_on: Some("2024-01-02T03:04:05Z".into()),
            created_on: Some("2024-01-02T03:04:05+00:00".into()),
            ..Entry::named("x")
        };
        assert_eq!(Times::from_entry(&entry).modified, 1_704_164_645);
    }
}
