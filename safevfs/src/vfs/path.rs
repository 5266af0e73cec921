//! Virtual path parsing and the per-namespace legality gates.

use crate::error::{VfsError, VfsResult};
use std::fmt;

/// Backend file-name prefix of a symlink shown under `/public`.
pub const PUBLIC_SYMLINK_PREFIX: &str = ".SAFE_SYMLINK_PUBLIC.";
/// Backend file-name prefix of a symlink shown under `/private`.
pub const PRIVATE_SYMLINK_PREFIX: &str = ".SAFE_SYMLINK.";
/// Child name used to probe whether a directory accepts new entries.
pub const WRITE_PROBE: &str = "._rfuse_check";
/// The backend refuses zero-byte objects; this body stands in for "empty".
pub const EMPTY_BODY: &[u8] = b"\n";

/// Replace an empty body with [`EMPTY_BODY`].
pub fn storable_body(body: &[u8]) -> &[u8] {
    if body.is_empty() { EMPTY_BODY } else { body }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Public,
    Private,
    Outside,
    Dns,
}

impl Namespace {
    /// Listing order of `/`.
    pub const ALL: [Namespace; 4] = [
        Namespace::Public,
        Namespace::Private,
        Namespace::Outside,
        Namespace::Dns,
    ];

    pub fn parse(segment: &str) -> VfsResult<Self> {
        match segment {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "outside" => Ok(Self::Outside),
            "dns" => Ok(Self::Dns),
            other => Err(VfsError::UnknownNamespace {
                segment: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Outside => "outside",
            Self::Dns => "dns",
        }
    }

    /// `public` and `private` are both views of the user's drive.
    pub fn is_plain(self) -> bool {
        matches!(self, Self::Public | Self::Private)
    }

    pub fn is_private(self) -> bool {
        self == Self::Private
    }

    /// The other half of the drive partition.
    pub fn sibling(self) -> Option<Self> {
        match self {
            Self::Public => Some(Self::Private),
            Self::Private => Some(Self::Public),
            _ => None,
        }
    }

    pub fn symlink_prefix(self) -> Option<&'static str> {
        match self {
            Self::Public => Some(PUBLIC_SYMLINK_PREFIX),
            Self::Private => Some(PRIVATE_SYMLINK_PREFIX),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a backend file name into the namespace and display name of the
/// symlink it encodes.
pub fn parse_symlink_name(file_name: &str) -> Option<(Namespace, &str)> {
    // the public prefix is checked first; it is the longer of the two
    if let Some(name) = file_name.strip_prefix(PUBLIC_SYMLINK_PREFIX) {
        return Some((Namespace::Public, name));
    }
    file_name
        .strip_prefix(PRIVATE_SYMLINK_PREFIX)
        .map(|name| (Namespace::Private, name))
}

/// Backend file name of the symlink `name` in a plain namespace.
pub fn symlink_backend_name(namespace: Namespace, name: &str) -> Option<String> {
    namespace
        .symlink_prefix()
        .map(|prefix| format!("{prefix}{name}"))
}

/// Join a namespace-relative directory and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Number of segments in a namespace-relative path (`/` has none).
pub fn depth(relative: &str) -> usize {
    relative.split('/').filter(|s| !s.is_empty()).count()
}

/// First segment of a namespace-relative path.
pub fn first_segment(relative: &str) -> Option<&str> {
    relative.split('/').find(|s| !s.is_empty())
}

/// A parsed virtual path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VirtualPath {
    Root,
    NamespaceRoot(Namespace),
    Entry {
        namespace: Namespace,
        /// Namespace-relative parent directory, always starting with `/`.
        parent: String,
        name: String,
    },
}

impl VirtualPath {
    pub fn parse(path: &str) -> VfsResult<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Self::Root);
        };
        let namespace = Namespace::parse(first)?;
        let Some((name, parents)) = rest.split_last() else {
            return Ok(Self::NamespaceRoot(namespace));
        };
        Ok(Self::Entry {
            namespace,
            parent: format!("/{}", parents.join("/")),
            name: (*name).to_string(),
        })
    }

    pub fn namespace(&self) -> Option<Namespace> {
        match self {
            Self::Root => None,
            Self::NamespaceRoot(ns) | Self::Entry { namespace: ns, .. } => Some(*ns),
        }
    }

    /// Path relative to the namespace root (`/` for the root itself).
    pub fn relative(&self) -> String {
        match self {
            Self::Root | Self::NamespaceRoot(_) => "/".to_string(),
            Self::Entry { parent, name, .. } => join(parent, name),
        }
    }
}

fn gate(path: &str, check: impl FnOnce(Namespace, &str) -> bool) -> bool {
    match VirtualPath::parse(path) {
        Ok(VirtualPath::Entry {
            namespace, parent, ..
        }) => check(namespace, &parent),
        _ => false,
    }
}

/// Files may be written under the drive namespaces, except directly in `/public`.
pub fn can_write(path: &str) -> bool {
    gate(path, |ns, parent| {
        ns.is_plain() && !(ns == Namespace::Public && parent == "/")
    })
}

/// Any drive entry may be removed, including files left directly in `/public`.
pub fn can_delete(path: &str) -> bool {
    gate(path, |ns, _| ns.is_plain())
}

/// Directories may be created anywhere in the drive namespaces and one level
/// deep under `/outside` (registering an external domain).
pub fn can_mkdir(path: &str) -> bool {
    gate(path, |ns, parent| {
        ns.is_plain() || (ns == Namespace::Outside && parent == "/")
    })
}

pub fn can_rmdir(path: &str) -> bool {
    can_mkdir(path)
}

/// `service.longname` identifier of a third-party service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalDomain {
    pub service: String,
    pub long_name: String,
}

impl ExternalDomain {
    pub fn parse(identifier: &str) -> VfsResult<Self> {
        let tokens: Vec<&str> = identifier.split('.').collect();
        match tokens.as_slice() {
            [service, long_name] if !service.is_empty() && !long_name.is_empty() => Ok(Self {
                service: (*service).to_string(),
                long_name: (*long_name).to_string(),
            }),
            _ => Err(VfsError::invalid(format!(
                "{identifier:?} is not a service.longname identifier"
            ))),
        }
    }
}

impl fmt::Display for ExternalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.long_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Write, discarding the existing body.
    Truncate,
    /// Read-modify-write at arbitrary offsets.
    Update,
    /// Writes always land at the end.
    Append,
}

impl OpenMode {
    pub fn from_flags(flags: u32) -> Self {
        let flags = flags as libc::c_int;
        if flags & libc::O_ACCMODE == libc::O_RDONLY {
            Self::Read
        } else if flags & libc::O_TRUNC != 0 {
            Self::Truncate
        } else if flags & libc::O_APPEND != 0 {
            Self::Append
        } else {
            Self::Update
        }
    }

    pub fn writes(self) -> bool {
        self != Self::Read
    }

    /// Whether the remote body must be staged before the first write.
    pub fn preloads(self) -> bool {
        matches!(self, Self::Update | Self::Append)
    }
}
