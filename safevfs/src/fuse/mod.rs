//! FUSE adapter and request handling
//!
//! Translates inode-addressed kernel requests into path-addressed `SafeVfs`
//! calls. Inode numbers come from [`inode::InodeTable`]; errors cross the
//! boundary through `From<VfsError> for rfuse3::Errno`.
//!
//! Submodules:
//! - `inode`: path <-> inode table
//! - `mount`: session setup helpers
pub mod inode;
pub mod mount;

use crate::config::SafeVfsConfig;
use crate::vfs::attr::Attributes;
use crate::vfs::cache::EntryKind;
use crate::vfs::fs::SafeVfs;
use crate::vfs::path::OpenMode;
use bytes::Bytes;
use inode::{InodeTable, child_path};
use rfuse3::Result as FuseResult;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::{FileType as FuseFileType, SetAttr, Timestamp};
use tracing::debug;

/// `SafeVfs` bound to the kernel.
pub struct SafeFuse {
    vfs: SafeVfs,
    inodes: InodeTable,
    ttl: Duration,
    max_write: NonZeroU32,
}

impl SafeFuse {
    pub fn new(vfs: SafeVfs, config: &SafeVfsConfig) -> Self {
        Self {
            vfs,
            inodes: InodeTable::new(),
            ttl: Duration::from_secs(config.attr_ttl_secs),
            max_write: NonZeroU32::new(config.max_write).unwrap_or(NonZeroU32::MIN),
        }
    }

    fn path_of(&self, ino: u64) -> FuseResult<String> {
        self.inodes.path_of(ino).ok_or_else(|| libc::ENOENT.into())
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        Ok(child_path(&self.path_of(parent)?, &name.to_string_lossy()))
    }

    /// getattr of `path`, interning its inode.
    async fn stat(&self, path: &str) -> FuseResult<FileAttr> {
        let attrs = self.vfs.getattr(path).await?;
        Ok(to_fuse_attr(self.inodes.intern(path), &attrs))
    }

    /// Entry reply for `path`, counted as a kernel lookup.
    async fn entry(&self, path: &str) -> FuseResult<ReplyEntry> {
        let attrs = self.vfs.getattr(path).await?;
        Ok(ReplyEntry {
            ttl: self.ttl,
            attr: to_fuse_attr(self.inodes.lookup(path), &attrs),
            generation: 0,
        })
    }

    /// Children of a directory with their attributes; entries that vanished
    /// between the listing and the stat are skipped.
    async fn children(&self, path: &str) -> FuseResult<Vec<(String, FileAttr)>> {
        let names = self.vfs.contents(path).await?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let child = child_path(path, &name);
            match self.stat(&child).await {
                Ok(attr) => out.push((name, attr)),
                Err(e) => debug!(%child, ?e, "skipping entry without attributes"),
            }
        }
        Ok(out)
    }
}

impl Filesystem for SafeFuse {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        Ok(ReplyInit {
            max_write: self.max_write,
        })
    }

    async fn destroy(&self, _req: Request) {}

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        self.entry(&path).await
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        Ok(ReplyAttr {
            ttl: self.ttl,
            attr: self.stat(&path).await?,
        })
    }

    // only size changes are meaningful; everything else is accepted and ignored
    async fn setattr(
        &self,
        _req: Request,
        ino: u64,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        if let Some(size) = set_attr.size {
            self.vfs.truncate(&path, fh, size).await?;
        }
        Ok(ReplyAttr {
            ttl: self.ttl,
            attr: self.stat(&path).await?,
        })
    }

    async fn readlink(&self, _req: Request, ino: u64) -> FuseResult<ReplyData> {
        let path = self.path_of(ino)?;
        let target = self.vfs.readlink(&path).await?;
        Ok(ReplyData {
            data: Bytes::from(target.into_bytes()),
        })
    }

    async fn symlink(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        link: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        self.vfs.symlink(&link.to_string_lossy(), &path).await?;
        self.entry(&path).await
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        self.vfs.mkdir(&path).await?;
        self.entry(&path).await
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_of(parent, name)?;
        self.vfs.delete(&path).await?;
        self.inodes.remove(&path);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_of(parent, name)?;
        self.vfs.rmdir(&path).await?;
        self.inodes.remove(&path);
        Ok(())
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let from = self.child_of(parent, name)?;
        let to = self.child_of(new_parent, new_name)?;
        self.vfs.rename(&from, &to).await?;
        self.inodes.rename(&from, &to);
        Ok(())
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        let fh = self.vfs.raw_open(&path, OpenMode::from_flags(flags)).await?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn create(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let path = self.child_of(parent, name)?;
        let fh = self.vfs.create(&path, OpenMode::from_flags(flags)).await?;
        let attr = self.stat(&path).await?;
        self.inodes.remember(attr.ino);
        Ok(ReplyCreated {
            ttl: self.ttl,
            attr,
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn read(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = self.vfs.raw_read(fh, offset, size).await?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = self.vfs.raw_write(fh, offset, data).await?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    // the staged body is written back here, not on flush
    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        self.vfs.raw_close(fh).await?;
        Ok(())
    }

    async fn flush(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _lock_owner: u64,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsync(&self, _req: Request, _inode: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(())
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        if !self.vfs.is_directory(&path).await? {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let path = self.path_of(ino)?;
        let children = self.children(&path).await?;

        let mut all: Vec<DirectoryEntry> = Vec::with_capacity(children.len() + 2);
        all.push(DirectoryEntry {
            inode: ino,
            kind: FuseFileType::Directory,
            name: OsString::from("."),
            offset: 1,
        });
        all.push(DirectoryEntry {
            inode: self.inodes.parent_of(ino),
            kind: FuseFileType::Directory,
            name: OsString::from(".."),
            offset: 2,
        });
        for (i, (name, attr)) in children.into_iter().enumerate() {
            all.push(DirectoryEntry {
                inode: attr.ino,
                kind: attr.kind,
                name: OsString::from(name),
                offset: (i as i64) + 3,
            });
        }

        let start = offset.max(0) as usize;
        let slice = all.into_iter().skip(start).map(Ok).collect::<Vec<_>>();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(slice));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let path = self.path_of(ino)?;
        let this = self.stat(&path).await?;
        let parent_ino = self.inodes.parent_of(ino);
        let parent = match self.inodes.path_of(parent_ino) {
            Some(p) => self.stat(&p).await?,
            None => this,
        };
        let children = self.children(&path).await?;

        let ttl = self.ttl;
        let plus = |inode, name: OsString, offset, attr: FileAttr| DirectoryEntryPlus {
            inode,
            generation: 0,
            kind: attr.kind,
            name,
            offset,
            attr,
            entry_ttl: ttl,
            attr_ttl: ttl,
        };
        let mut all: Vec<DirectoryEntryPlus> = Vec::with_capacity(children.len() + 2);
        all.push(plus(ino, OsString::from("."), 1, this));
        all.push(plus(parent_ino, OsString::from(".."), 2, parent));
        for (i, (name, attr)) in children.into_iter().enumerate() {
            all.push(plus(attr.ino, OsString::from(name), (i as i64) + 3, attr));
        }

        let slice = all
            .into_iter()
            .skip(offset as usize)
            .collect::<Vec<_>>();
        // the kernel takes a lookup on every entry except `.` and `..`
        for entry in slice.iter().filter(|e| e.offset > 2) {
            self.inodes.remember(entry.inode);
        }
        let slice = slice.into_iter().map(Ok).collect::<Vec<_>>();
        let boxed: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(slice));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    // no backend quota information; report an unbounded, empty filesystem
    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: u64::MAX,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        })
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.inodes.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for &(inode, nlookup) in inodes {
            self.inodes.forget(inode, nlookup);
        }
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

fn fuse_kind(kind: EntryKind) -> FuseFileType {
    match kind {
        EntryKind::Folder => FuseFileType::Directory,
        EntryKind::File => FuseFileType::RegularFile,
        EntryKind::Symlink => FuseFileType::Symlink,
    }
}

fn to_fuse_attr(ino: u64, a: &Attributes) -> FileAttr {
    let ts = |secs: i64| Timestamp::new(secs, 0);
    FileAttr {
        ino,
        size: a.size,
        blocks: a.size.div_ceil(512),
        atime: ts(a.times.accessed),
        mtime: ts(a.times.modified),
        ctime: ts(a.times.created),
        #[cfg(target_os = "macos")]
        crtime: ts(a.times.created),
        kind: fuse_kind(a.kind),
        perm: a.perm,
        nlink: a.nlink,
        uid: a.uid,
        gid: a.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}
