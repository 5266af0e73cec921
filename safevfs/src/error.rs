use crate::cadapter::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    #[error("operation not permitted on {path}: {reason}")]
    PermissionDenied { path: String, reason: &'static str },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("directory not empty: {path}")]
    NotEmpty { path: String },

    #[error("{op} is not implemented")]
    NotImplemented { op: &'static str },

    #[error("unknown namespace: {segment}")]
    UnknownNamespace { segment: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("bad file handle: {fh}")]
    BadHandle { fh: u64 },

    /// The old object was deleted but the new body could not be stored.
    #[error("{path} was deleted but could not be recreated: {source}")]
    PartialRewrite {
        path: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed settings record: {0}")]
    Settings(#[from] serde_json::Error),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn denied(path: impl Into<String>, reason: &'static str) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            reason,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// POSIX error number reported to the kernel.
    pub fn errno(&self) -> libc::c_int {
        match self {
            Self::NotFound { .. } => libc::ENOENT,
            Self::PermissionDenied { .. } => libc::EPERM,
            Self::InvalidArgument { .. } => libc::EINVAL,
            Self::NotEmpty { .. } => libc::ENOTEMPTY,
            Self::NotImplemented { .. } => libc::ENOSYS,
            Self::UnknownNamespace { .. } | Self::BadHandle { .. } => libc::EBADF,
            Self::AlreadyExists { .. } => libc::EEXIST,
            Self::PartialRewrite { .. } | Self::Io(_) | Self::Settings(_) => libc::EIO,
            Self::Backend(e) => match e {
                BackendError::NotFound { .. } => libc::ENOENT,
                BackendError::AlreadyExists { .. } => libc::EEXIST,
                BackendError::EmptyBody { .. } => libc::EINVAL,
                BackendError::Rejected { .. } | BackendError::Transport(_) => libc::EIO,
            },
        }
    }
}

impl From<VfsError> for rfuse3::Errno {
    fn from(e: VfsError) -> Self {
        e.errno().into()
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
