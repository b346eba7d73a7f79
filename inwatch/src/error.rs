//! Error types for inotify access.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::decoder::DecodeError;
use crate::watch::WatchDescriptor;

/// Result type alias for inotify operations.
pub type Result<T> = std::result::Result<T, InotifyError>;

/// Errors that can occur while creating, reading or watching with inotify.
#[derive(Error, Debug)]
pub enum InotifyError {
    /// The inotify instance could not be created.
    #[error("failed to create inotify instance: {0}")]
    Init(#[source] io::Error),

    /// The watch target does not exist.
    #[error("path not found: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// ONLYDIR was requested and the target is not a directory.
    #[error("not a directory: {}", path.display())]
    NotADirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// MASK_CREATE was requested and the target is already watched.
    #[error("already watched: {}", path.display())]
    AlreadyExists {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The mask was rejected, e.g. MASK_ADD combined with MASK_CREATE.
    #[error("invalid watch request for {}: {source}", path.display())]
    InvalidArgument {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No read access to the target.
    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The per-user watch limit was reached.
    #[error("watch limit exceeded while watching {}", path.display())]
    WatchLimit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other failure from adding a watch.
    #[error("failed to watch {}: {source}", path.display())]
    AddWatch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Removing a watch failed.
    #[error("failed to remove watch {wd}: {source}")]
    RemoveWatch {
        wd: WatchDescriptor,
        #[source]
        source: io::Error,
    },

    /// Reading from the inotify handle failed.
    #[error("read from inotify failed: {0}")]
    Read(#[source] io::Error),

    /// The kernel returned bytes that do not form valid records.
    #[error("malformed event record: {0}")]
    Decode(#[from] DecodeError),

    /// The event source has been closed.
    #[error("event source is closed")]
    Closed,

    /// An earlier read or decode error left the source unusable.
    #[error("event source failed earlier and can no longer be read")]
    Failed,

    /// IO error outside of the inotify handle itself.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl InotifyError {
    /// Classify a failed add-watch call by its OS error number.
    pub fn from_add_watch(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.raw_os_error() {
            Some(libc::ENOENT) => Self::NotFound { path, source },
            Some(libc::ENOTDIR) => Self::NotADirectory { path, source },
            Some(libc::EEXIST) => Self::AlreadyExists { path, source },
            Some(libc::EINVAL) => Self::InvalidArgument { path, source },
            Some(libc::EACCES) => Self::PermissionDenied { path, source },
            Some(libc::ENOSPC) => Self::WatchLimit { path, source },
            _ => Self::AddWatch { path, source },
        }
    }

    /// Whether the error means the watch target disappeared or was replaced
    /// before the watch could be added.
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotADirectory { .. })
    }

    /// The OS error behind this failure, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Init(source) | Self::Read(source) | Self::Io(source) => Some(source),
            Self::NotFound { source, .. }
            | Self::NotADirectory { source, .. }
            | Self::AlreadyExists { source, .. }
            | Self::InvalidArgument { source, .. }
            | Self::PermissionDenied { source, .. }
            | Self::WatchLimit { source, .. }
            | Self::AddWatch { source, .. }
            | Self::RemoveWatch { source, .. } => Some(source),
            Self::Decode(_) | Self::Closed | Self::Failed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_watch_errors_are_classified() {
        let path = Path::new("/missing");
        let cases = [
            (libc::ENOENT, "NotFound"),
            (libc::ENOTDIR, "NotADirectory"),
            (libc::EEXIST, "AlreadyExists"),
            (libc::EINVAL, "InvalidArgument"),
            (libc::EACCES, "PermissionDenied"),
            (libc::ENOSPC, "WatchLimit"),
            (libc::EBADF, "AddWatch"),
        ];

        for (errno, expected) in cases {
            let err = InotifyError::from_add_watch(path, io::Error::from_raw_os_error(errno));
            let debug = format!("{err:?}");
            assert!(debug.starts_with(expected), "{errno} mapped to {debug}");
            assert_eq!(err.io_error().and_then(io::Error::raw_os_error), Some(errno));
        }
    }

    #[test]
    fn test_vanished_errors() {
        let path = Path::new("/gone");
        let missing = InotifyError::from_add_watch(path, io::Error::from_raw_os_error(libc::ENOENT));
        let exists = InotifyError::from_add_watch(path, io::Error::from_raw_os_error(libc::EEXIST));

        assert!(missing.is_vanished());
        assert!(!exists.is_vanished());
        assert_eq!(missing.to_string(), "path not found: /gone");
    }
}
