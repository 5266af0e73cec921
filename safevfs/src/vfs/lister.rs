//! Directory listings: fetch from the backend and repopulate the cache.
//!
//! A listing is a snapshot: the node is reset before being filled again. The
//! fetch runs without any cache lock held; the populate step takes the tree
//! lock(s) once and only marks the node valid if no invalidation happened in
//! between.

use super::cache::{Entry, EntryKind, NamespaceCaches};
use super::path::{self, ExternalDomain, Namespace};
use super::settings::SettingsStore;
use crate::cadapter::{BackendError, DirectoryListing, RootPath, SafeBackend};
use crate::error::{VfsError, VfsResult};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Lister {
    backend: Arc<dyn SafeBackend>,
    caches: Arc<NamespaceCaches>,
    settings: Arc<SettingsStore>,
    mount_point: String,
}

impl Lister {
    pub fn new(
        backend: Arc<dyn SafeBackend>,
        caches: Arc<NamespaceCaches>,
        settings: Arc<SettingsStore>,
        mount_point: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            caches,
            settings,
            mount_point: mount_point.into(),
        }
    }

    /// Names under `relative`, served from the cache while it is valid.
    pub async fn contents(&self, namespace: Namespace, relative: &str) -> VfsResult<Vec<String>> {
        {
            let tree = self.caches.tree(namespace);
            if tree.is_valid(relative) {
                debug!(%namespace, relative, "listing served from cache");
                return Ok(tree.names(relative));
            }
        }
        self.list(namespace, relative).await
    }

    /// List `relative` only if its node is not valid.
    pub async fn ensure_listed(&self, namespace: Namespace, relative: &str) -> VfsResult<()> {
        if !self.caches.tree(namespace).is_valid(relative) {
            self.list(namespace, relative).await?;
        }
        Ok(())
    }

    /// Fetch `relative` from the backend and repopulate its node.
    pub async fn list(&self, namespace: Namespace, relative: &str) -> VfsResult<Vec<String>> {
        debug!(%namespace, relative, "listing from backend");
        match namespace {
            Namespace::Public | Namespace::Private => self.list_drive(namespace, relative).await,
            Namespace::Outside => self.list_outside(relative).await,
            Namespace::Dns => self.list_dns(relative).await,
        }
    }

    async fn list_drive(&self, namespace: Namespace, relative: &str) -> VfsResult<Vec<String>> {
        let generations = {
            let (mut public, mut private) = self.caches.drive_pair();
            (public.begin_listing(relative), private.begin_listing(relative))
        };
        let Some(listing) = absorb_not_found(
            relative,
            self.backend.get_directory(RootPath::Drive, relative).await,
        )?
        else {
            return Ok(Vec::new());
        };

        let (mut public, mut private) = self.caches.drive_pair();
        public.reset(relative);
        private.reset(relative);
        for folder in &listing.sub_directories {
            let tree = if folder.is_private { &mut private } else { &mut public };
            tree.put(EntryKind::Folder, relative, Entry::from_item(folder, &folder.name));
        }
        for file in &listing.files {
            match path::parse_symlink_name(&file.name) {
                Some((Namespace::Public, name)) => {
                    public.put(EntryKind::Symlink, relative, Entry::from_item(file, name))
                }
                Some((_, name)) => {
                    private.put(EntryKind::Symlink, relative, Entry::from_item(file, name))
                }
                None => {
                    let tree = if file.is_private { &mut private } else { &mut public };
                    tree.put(EntryKind::File, relative, Entry::from_item(file, &file.name));
                }
            }
        }
        public.mark_valid(relative, generations.0);
        private.mark_valid(relative, generations.1);

        Ok(match namespace {
            Namespace::Private => private.names(relative),
            _ => public.names(relative),
        })
    }

    async fn list_outside(&self, relative: &str) -> VfsResult<Vec<String>> {
        match path::depth(relative) {
            0 => {
                let generation = self.caches.tree(Namespace::Outside).begin_listing("/");
                let settings = self.settings.load().await?;
                let mut tree = self.caches.tree(Namespace::Outside);
                tree.reset("/");
                for domain in &settings.alien_items {
                    tree.put(EntryKind::Folder, "/", Entry::named(domain));
                }
                tree.mark_valid("/", generation);
                Ok(tree.names("/"))
            }
            1 => {
                let identifier = path::first_segment(relative).unwrap_or_default();
                let domain = ExternalDomain::parse(identifier)?;
                let generation = self.caches.tree(Namespace::Outside).begin_listing(relative);
                let Some(listing) = absorb_not_found(
                    relative,
                    self.backend
                        .get_home_dir(&domain.long_name, &domain.service)
                        .await,
                )?
                else {
                    return Ok(Vec::new());
                };
                let mut tree = self.caches.tree(Namespace::Outside);
                populate_all(&mut tree, relative, &listing);
                tree.mark_valid(relative, generation);
                Ok(tree.names(relative))
            }
            _ => Err(VfsError::denied(
                format!("/outside{relative}"),
                "only the top of an external domain can be listed",
            )),
        }
    }

    async fn list_dns(&self, relative: &str) -> VfsResult<Vec<String>> {
        match path::depth(relative) {
            0 => {
                let generation = self.caches.tree(Namespace::Dns).begin_listing("/");
                let long_names = self.backend.list_long_names().await?;
                let mut tree = self.caches.tree(Namespace::Dns);
                tree.reset("/");
                for long_name in &long_names {
                    tree.put(EntryKind::Folder, "/", Entry::named(long_name));
                }
                tree.mark_valid("/", generation);
                Ok(tree.names("/"))
            }
            1 => {
                let long_name = path::first_segment(relative).unwrap_or_default();
                let generation = self.caches.tree(Namespace::Dns).begin_listing(relative);
                let Some(services) = absorb_not_found(
                    relative,
                    self.backend.list_services(long_name).await,
                )?
                else {
                    return Ok(Vec::new());
                };
                let mut tree = self.caches.tree(Namespace::Dns);
                tree.reset(relative);
                for service in &services {
                    // approximates the readlink target without a home-dir lookup per service
                    let target = format!("{}/public/{service}", self.mount_point);
                    tree.put(
                        EntryKind::Symlink,
                        relative,
                        Entry {
                            size: target.len() as u64,
                            ..Entry::named(service)
                        },
                    );
                }
                tree.mark_valid(relative, generation);
                Ok(tree.names(relative))
            }
            _ => Err(VfsError::denied(
                format!("/dns{relative}"),
                "services have no children",
            )),
        }
    }
}

/// Treat a missing directory as an empty listing, leaving the cache as it was.
fn absorb_not_found<T>(relative: &str, result: Result<T, BackendError>) -> VfsResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => {
            warn!(relative, "listing target missing on backend, reporting it empty");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Populate without a privacy split; external homes are read-only anyway.
fn populate_all(tree: &mut super::cache::CacheTree, relative: &str, listing: &DirectoryListing) {
    tree.reset(relative);
    for folder in &listing.sub_directories {
        tree.put(EntryKind::Folder, relative, Entry::from_item(folder, &folder.name));
    }
    for file in &listing.files {
        tree.put(EntryKind::File, relative, Entry::from_item(file, &file.name));
    }
}
