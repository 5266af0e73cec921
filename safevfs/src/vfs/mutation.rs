//! Namespace mutations.
//!
//! Every successful mutation leaves the affected directory nodes invalid.
//! `rename` and registering an external domain additionally re-list right
//! away; the others let the next lookup pay for the fetch.

use super::attr::AttributeResolver;
use super::cache::{EntryKind, NamespaceCaches};
use super::lister::Lister;
use super::path::{self, ExternalDomain, Namespace, VirtualPath};
use super::settings::SettingsStore;
use crate::cadapter::{RootPath, SafeBackend};
use crate::error::{VfsError, VfsResult};
use std::sync::Arc;
use tracing::{debug, info};

pub struct MutationCoordinator {
    backend: Arc<dyn SafeBackend>,
    caches: Arc<NamespaceCaches>,
    lister: Arc<Lister>,
    attrs: Arc<AttributeResolver>,
    settings: Arc<SettingsStore>,
    mount_point: String,
}

/// Parsed `Entry` path, or permission-denied for `/` and namespace roots.
fn entry_of(path: &str, op: &'static str) -> VfsResult<(Namespace, String, String)> {
    match VirtualPath::parse(path)? {
        VirtualPath::Entry {
            namespace,
            parent,
            name,
        } => Ok((namespace, parent, name)),
        _ => Err(VfsError::denied(path, op)),
    }
}

impl MutationCoordinator {
    pub fn new(
        backend: Arc<dyn SafeBackend>,
        caches: Arc<NamespaceCaches>,
        lister: Arc<Lister>,
        attrs: Arc<AttributeResolver>,
        settings: Arc<SettingsStore>,
        mount_point: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            caches,
            lister,
            attrs,
            settings,
            mount_point: mount_point.into(),
        }
    }

    pub async fn mkdir(&self, path: &str) -> VfsResult<()> {
        let (namespace, parent, name) = entry_of(path, "cannot create a namespace root")?;
        match namespace {
            Namespace::Outside => {
                if parent != "/" {
                    return Err(VfsError::denied(path, "external domains are read-only"));
                }
                let domain = ExternalDomain::parse(&name)?;
                match self
                    .backend
                    .get_home_dir(&domain.long_name, &domain.service)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => return Err(VfsError::not_found(path)),
                    Err(e) => return Err(e.into()),
                }
                self.settings.add(&name).await?;
                info!(%domain, "registered external domain");
                self.caches.tree(Namespace::Outside).invalidate("/");
                self.lister.list(Namespace::Outside, "/").await?;
                Ok(())
            }
            Namespace::Dns => Err(VfsError::denied(path, "the domain registry is read-only")),
            Namespace::Public | Namespace::Private => {
                self.backend
                    .create_directory(
                        RootPath::Drive,
                        &path::join(&parent, &name),
                        namespace.is_private(),
                    )
                    .await?;
                self.caches.invalidate_drive(&parent);
                Ok(())
            }
        }
    }

    pub async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let (namespace, parent, name) = entry_of(path, "cannot remove a namespace root")?;
        match namespace {
            Namespace::Outside => {
                if parent != "/" {
                    return Err(VfsError::denied(path, "external domains are read-only"));
                }
                if !self.settings.remove(&name).await? {
                    return Err(VfsError::not_found(path));
                }
                self.caches.tree(Namespace::Outside).invalidate("/");
                Ok(())
            }
            Namespace::Dns => Err(VfsError::denied(path, "the domain registry is read-only")),
            Namespace::Public | Namespace::Private => {
                if !self.attrs.directory_exists(path).await? {
                    return Err(VfsError::not_found(path));
                }
                let relative = path::join(&parent, &name);
                self.lister.ensure_listed(namespace, &relative).await?;
                {
                    let (public, private) = self.caches.drive_pair();
                    let occupied = [&public, &private]
                        .iter()
                        .any(|t| t.has_files(&relative) || t.has_folders(&relative));
                    if occupied {
                        return Err(VfsError::NotEmpty {
                            path: path.to_string(),
                        });
                    }
                }
                self.backend
                    .delete_directory(RootPath::Drive, &relative)
                    .await?;
                self.caches.invalidate_drive(&relative);
                self.caches.invalidate_drive(&parent);
                Ok(())
            }
        }
    }

    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let (namespace, from_parent, from_name) = entry_of(from, "cannot rename a root")?;
        let (to_namespace, to_parent, to_name) = entry_of(to, "cannot rename onto a root")?;
        if namespace != to_namespace {
            return Err(VfsError::denied(from, "cannot move between namespaces"));
        }
        let Some(sibling) = namespace.sibling() else {
            return Err(VfsError::denied(from, "namespace is read-only"));
        };

        let source = VirtualPath::parse(from)?;
        let Some((kind, _)) = self.attrs.lookup(&source).await? else {
            return Err(VfsError::not_found(from));
        };
        if kind != EntryKind::Folder && !path::can_write(to) {
            return Err(VfsError::denied(to, "files cannot be placed here"));
        }

        if kind == EntryKind::Folder {
            self.lister.ensure_listed(sibling, &to_parent).await?;
            if self
                .caches
                .tree(sibling)
                .get(EntryKind::Folder, &to_parent, &to_name)
                .is_some()
            {
                return Err(VfsError::denied(
                    to,
                    "a directory with this name exists in the other namespace",
                ));
            }
        }

        let (from_backend, to_backend) = match kind {
            EntryKind::Symlink => (
                path::symlink_backend_name(namespace, &from_name).unwrap_or_default(),
                path::symlink_backend_name(namespace, &to_name).unwrap_or_default(),
            ),
            _ => (from_name.clone(), to_name.clone()),
        };

        let mut current = path::join(&from_parent, &from_backend);
        if from_parent != to_parent {
            match kind {
                EntryKind::Folder => {
                    self.backend
                        .move_directory(RootPath::Drive, &current, RootPath::Drive, &to_parent)
                        .await?
                }
                _ => {
                    self.backend
                        .move_file(RootPath::Drive, &current, RootPath::Drive, &to_parent)
                        .await?
                }
            }
            current = path::join(&to_parent, &from_backend);
        }
        if from_backend != to_backend {
            match kind {
                EntryKind::Folder => {
                    self.backend
                        .rename_directory(RootPath::Drive, &current, &to_backend)
                        .await?
                }
                _ => {
                    self.backend
                        .rename_file(RootPath::Drive, &current, &to_backend)
                        .await?
                }
            }
        }
        debug!(from, to, ?kind, "renamed");

        self.caches.invalidate_drive(&from_parent);
        self.caches.invalidate_drive(&to_parent);
        if kind == EntryKind::Folder {
            self.caches.invalidate_drive(&path::join(&from_parent, &from_name));
        }
        self.lister.list(namespace, &from_parent).await?;
        if to_parent != from_parent {
            self.lister.list(namespace, &to_parent).await?;
        }
        Ok(())
    }

    pub async fn symlink(&self, target: &str, link: &str) -> VfsResult<()> {
        let (namespace, parent, name) = entry_of(link, "cannot create a link here")?;
        match namespace {
            Namespace::Public | Namespace::Private => {
                if !path::can_write(link) {
                    return Err(VfsError::denied(link, "links cannot be created here"));
                }
                let body = self.link_body(target, link)?;
                let backend_name =
                    path::symlink_backend_name(namespace, &name).unwrap_or_default();
                self.backend
                    .create_file(
                        RootPath::Drive,
                        &path::join(&parent, &backend_name),
                        body.as_bytes(),
                        namespace.is_private(),
                    )
                    .await?;
                self.caches.invalidate_drive(&parent);
                Ok(())
            }
            Namespace::Dns if path::depth(&parent) == 1 => {
                let long_name = path::first_segment(&parent).unwrap_or_default();
                let public_root = format!("{}/public/", self.mount_point);
                let Some(home) = target.strip_prefix(&public_root) else {
                    return Err(VfsError::denied(
                        link,
                        "a service home must be a directory under /public",
                    ));
                };
                let home = format!("/{}", home.trim_end_matches('/'));
                self.backend.add_service(long_name, &name, &home).await?;
                info!(service = %name, long_name, %home, "published service");
                self.caches.tree(Namespace::Dns).invalidate(&parent);
                Ok(())
            }
            _ => Err(VfsError::denied(link, "namespace is read-only")),
        }
    }

    /// Body stored for a link to `target`: mount-relative when absolute.
    fn link_body(&self, target: &str, link: &str) -> VfsResult<String> {
        if target.is_empty() {
            return Err(VfsError::invalid("empty link target"));
        }
        if !target.starts_with('/') {
            return Ok(target.to_string());
        }
        match target.strip_prefix(&self.mount_point) {
            Some(rest) if rest.starts_with('/') => Ok(rest.to_string()),
            _ => Err(VfsError::denied(
                link,
                "absolute targets must lie inside the mount",
            )),
        }
    }

    pub async fn readlink(&self, path: &str) -> VfsResult<String> {
        let (namespace, parent, name) = entry_of(path, "not a link")?;
        match namespace {
            Namespace::Dns if path::depth(&parent) == 1 => {
                let long_name = path::first_segment(&parent).unwrap_or_default();
                let home = self.backend.get_home_dir(long_name, &name).await?;
                Ok(format!("{}/public/{}", self.mount_point, home.info.name))
            }
            Namespace::Public | Namespace::Private => {
                let backend_name =
                    path::symlink_backend_name(namespace, &name).unwrap_or_default();
                let body = match self
                    .backend
                    .get_file(RootPath::Drive, &path::join(&parent, &backend_name))
                    .await
                {
                    Ok(body) => body,
                    Err(e) if e.is_not_found() => return Err(VfsError::not_found(path)),
                    Err(e) => return Err(e.into()),
                };
                let body = String::from_utf8_lossy(&body).into_owned();
                Ok(if body.starts_with('/') {
                    format!("{}{body}", self.mount_point)
                } else {
                    body
                })
            }
            Namespace::Outside => Err(VfsError::NotImplemented { op: "readlink" }),
            _ => Err(VfsError::invalid(format!("{path} is not a link"))),
        }
    }

    pub async fn delete(&self, path: &str) -> VfsResult<()> {
        let (namespace, parent, name) = entry_of(path, "cannot delete a root")?;
        if !path::can_delete(path) {
            return Err(VfsError::denied(path, "namespace is read-only"));
        }
        let vpath = VirtualPath::parse(path)?;
        let backend_name = match self.attrs.lookup(&vpath).await? {
            Some((EntryKind::Symlink, _)) => {
                path::symlink_backend_name(namespace, &name).unwrap_or_default()
            }
            Some((EntryKind::File, _)) => name,
            Some((EntryKind::Folder, _)) => {
                return Err(VfsError::denied(path, "use rmdir for directories"));
            }
            None => return Err(VfsError::not_found(path)),
        };
        self.backend
            .delete_file(RootPath::Drive, &path::join(&parent, &backend_name))
            .await?;
        self.caches.invalidate_drive(&parent);
        Ok(())
    }

    /// Create an empty file (stored as a single newline) unless one exists.
    pub async fn touch(&self, path: &str) -> VfsResult<()> {
        let (namespace, parent, name) = entry_of(path, "cannot touch a root")?;
        if !path::can_write(path) {
            return Err(VfsError::denied(path, "files cannot be created here"));
        }
        if self.attrs.file_exists(path).await? {
            return Ok(());
        }
        self.backend
            .create_file(
                RootPath::Drive,
                &path::join(&parent, &name),
                path::EMPTY_BODY,
                namespace.is_private(),
            )
            .await?;
        self.caches.invalidate_drive(&parent);
        Ok(())
    }
}
