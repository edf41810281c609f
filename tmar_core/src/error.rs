//! Error types for tmar_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using tmar_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while packing or unpacking an archive.
#[derive(Error, Debug)]
pub enum Error {
    /// An input file, directory or archive could not be opened or read.
    #[error("Cannot read {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file changed between the scan and the pack pass.
    #[error("Source changed during pack {path}: {reason}")]
    SourceChanged { path: PathBuf, reason: String },

    /// The archive or an output file could not be created or written.
    #[error("Cannot write {path}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive is malformed, truncated or references missing blobs.
    #[error("Corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    /// The compression primitive reported an error.
    #[error("Codec failure: {reason}")]
    Codec { reason: String },

    /// Restoring permissions or timestamps failed.
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration value is missing or out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Coarse classification of an [`Error`], for callers deciding whether to
/// retry, alert or discard partial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceUnreadable,
    DestinationUnwritable,
    CorruptArchive,
    CodecFailure,
    FilesystemError,
    InvalidInput,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceUnreadable { .. } | Error::SourceChanged { .. } => {
                ErrorKind::SourceUnreadable
            }
            Error::DestinationUnwritable { .. } => ErrorKind::DestinationUnwritable,
            Error::CorruptArchive { .. } => ErrorKind::CorruptArchive,
            Error::Codec { .. } => ErrorKind::CodecFailure,
            Error::Filesystem { .. } => ErrorKind::FilesystemError,
            Error::InvalidConfig { .. } => ErrorKind::InvalidInput,
        }
    }

    /// Create a SourceUnreadable error.
    pub fn source_unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::SourceUnreadable {
            path: path.into(),
            source,
        }
    }

    /// Create a SourceChanged error.
    pub fn source_changed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::SourceChanged {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a DestinationUnwritable error.
    pub fn destination_unwritable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::DestinationUnwritable {
            path: path.into(),
            source,
        }
    }

    /// Create a CorruptArchive error.
    pub fn corrupt_archive(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a Codec error.
    pub fn codec(reason: impl Into<String>) -> Self {
        Error::Codec {
            reason: reason.into(),
        }
    }

    /// Create a Filesystem error.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_kind_classification() {
        let err = Error::corrupt_archive("a.tmar", "bad magic");
        assert_eq!(err.kind(), ErrorKind::CorruptArchive);

        let err = Error::source_changed("x", "size differs");
        assert_eq!(err.kind(), ErrorKind::SourceUnreadable);

        let err = Error::filesystem("x", io::Error::other("nope"));
        assert_eq!(err.kind(), ErrorKind::FilesystemError);

        assert_eq!(Error::codec("boom").kind(), ErrorKind::CodecFailure);
    }

    #[test]
    fn test_display_includes_path_and_reason() {
        let err = Error::corrupt_archive("/tmp/a.tmar", "truncated blob");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/a.tmar"));
        assert!(msg.contains("truncated blob"));
    }
}
