//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Only supported on Linux. Unprivileged mounts go through fusermount3.
//! - These helpers are thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;
use tracing::info;

use super::SafeFuse;
use crate::config::SafeVfsConfig;
use crate::vfs::fs::SafeVfs;

/// Mount options derived from the configuration.
fn mount_options(config: &SafeVfsConfig) -> MountOptions {
    let mut mo = MountOptions::default();
    // SAFETY: getuid/getgid cannot fail and touch no memory
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    mo.fs_name(config.fs_name.as_str())
        .uid(uid)
        .gid(gid)
        .allow_other(config.allow_other);
    mo
}

/// Mount `vfs` on an empty directory and return the session handle.
#[cfg(target_os = "linux")]
pub async fn mount_safevfs(
    vfs: SafeVfs,
    mount_point: impl AsRef<Path>,
    config: &SafeVfsConfig,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    let fs = SafeFuse::new(vfs, config);
    let session = rfuse3::raw::Session::new(mount_options(config));
    info!(
        mount_point = %mount_point.as_ref().display(),
        unprivileged = config.unprivileged,
        "mounting safevfs"
    );
    if config.unprivileged {
        session.mount_with_unprivileged(fs, mount_point.as_ref()).await
    } else {
        session.mount(fs, mount_point.as_ref()).await
    }
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_safevfs(
    _vfs: SafeVfs,
    _mount_point: impl AsRef<Path>,
    _config: &SafeVfsConfig,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
