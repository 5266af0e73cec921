//! Storage network adapter (cAdapter)
//!
//! Submodules:
//! - `memory`: in-process backend used by tests and the demo mount
//!
//! Responsibilities summary:
//! - Describe the capability surface the VFS needs from the storage network as
//!   one async trait, so the adapter never talks to a concrete client directly.
//! - Carry the backend's own data model unchanged: a single item set per
//!   directory with an `is_private` flag, whole-object create/delete only, and
//!   a separate DNS registry for external long names.
//!
//! Paths handed to the backend are absolute within their root (`/a/b/file`).
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which storage area a path is resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootPath {
    /// Application-private area; holds `settings.json`.
    App,
    /// The user's shared drive; holds everything under `/public` and `/private`.
    Drive,
}

/// Attributes of a single backend item, as reported in listings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub name: String,
    pub size: u64,
    /// RFC 3339 timestamps; the network does not always fill them in.
    pub created_on: Option<String>,
    pub modified_on: Option<String>,
    pub is_private: bool,
}

/// One directory listing: the directory itself plus its direct children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub info: ItemInfo,
    pub files: Vec<ItemInfo>,
    pub sub_directories: Vec<ItemInfo>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no such item: {path}")]
    NotFound { path: String },

    #[error("item already exists: {path}")]
    AlreadyExists { path: String },

    #[error("empty file bodies are rejected: {path}")]
    EmptyBody { path: String },

    #[error("backend rejected request ({code}): {description}")]
    Rejected { code: i64, description: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

impl BackendError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Capability surface of the storage network client.
///
/// Every call is a blocking network round trip from the adapter's point of
/// view. Implementations must not retry on their own.
#[async_trait]
pub trait SafeBackend: Send + Sync {
    async fn get_directory(&self, root: RootPath, path: &str) -> BackendResult<DirectoryListing>;

    async fn create_directory(
        &self,
        root: RootPath,
        path: &str,
        is_private: bool,
    ) -> BackendResult<()>;

    async fn delete_directory(&self, root: RootPath, path: &str) -> BackendResult<()>;

    /// Change a directory's name in place.
    async fn rename_directory(&self, root: RootPath, path: &str, new_name: &str)
    -> BackendResult<()>;

    /// Move a directory (keeping its name) under `dest_dir`.
    async fn move_directory(
        &self,
        root: RootPath,
        path: &str,
        dest_root: RootPath,
        dest_dir: &str,
    ) -> BackendResult<()>;

    async fn get_file(&self, root: RootPath, path: &str) -> BackendResult<Vec<u8>>;

    async fn create_file(
        &self,
        root: RootPath,
        path: &str,
        body: &[u8],
        is_private: bool,
    ) -> BackendResult<()>;

    async fn delete_file(&self, root: RootPath, path: &str) -> BackendResult<()>;

    /// Change a file's name in place (metadata update).
    async fn rename_file(&self, root: RootPath, path: &str, new_name: &str) -> BackendResult<()>;

    /// Move a file (keeping its name) under `dest_dir`.
    async fn move_file(
        &self,
        root: RootPath,
        path: &str,
        dest_root: RootPath,
        dest_dir: &str,
    ) -> BackendResult<()>;

    /// Long names registered by the current user.
    async fn list_long_names(&self) -> BackendResult<Vec<String>>;

    /// Services published under a long name.
    async fn list_services(&self, long_name: &str) -> BackendResult<Vec<String>>;

    /// Home directory of `service.long_name`, which may belong to anyone.
    async fn get_home_dir(&self, long_name: &str, service: &str)
    -> BackendResult<DirectoryListing>;

    /// Fetch a file below a service's home directory without credentials.
    async fn get_file_unauth(
        &self,
        long_name: &str,
        service: &str,
        path: &str,
    ) -> BackendResult<Vec<u8>>;

    /// Publish `home_dir` (a public drive directory) as `service.long_name`.
    async fn add_service(&self, long_name: &str, service: &str, home_dir: &str)
    -> BackendResult<()>;
}
