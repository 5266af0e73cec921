//! safevfs: a SAFE-style network drive exposed as a POSIX filesystem.
//!
//! `vfs` holds the adapter itself, `cadapter` the backend boundary, `fuse`
//! the kernel binding.

pub mod cadapter;
pub mod config;
pub mod error;
pub mod fuse;
pub mod vfs;

pub use error::{VfsError, VfsResult};
pub use vfs::fs::SafeVfs;
