//! Error types for poly-fs

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using FsError
pub type Result<T> = std::result::Result<T, FsError>;

/// File engine failures
#[derive(Error, Debug)]
pub enum FsError {
    #[error("path not allowed: {}: {reason}", path.display())]
    PathNotAllowed { path: PathBuf, reason: String },

    #[error("file too large: {} is {size} bytes (max {max})", path.display())]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("backup failed for {}: {reason}", path.display())]
    BackupFailed { path: PathBuf, reason: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound { path }
        } else {
            FsError::Io { path, source }
        }
    }

    pub(crate) fn not_allowed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FsError::PathNotAllowed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// JSON-RPC style error code
    pub fn code(&self) -> i32 {
        match self {
            FsError::PathNotAllowed { .. } => -32001,
            FsError::FileTooLarge { .. } => -32002,
            FsError::NotFound { .. } => -32003,
            FsError::BackupFailed { .. } => -32004,
            FsError::InvalidPattern { .. } => -32602,
            FsError::Io { .. } => -32000,
        }
    }

    /// A hint for the user (or model) on how to recover
    pub fn suggestion(&self) -> &'static str {
        match self {
            FsError::PathNotAllowed { .. } => {
                "Use a path inside the allowed directories and avoid blacklisted extensions"
            }
            FsError::FileTooLarge { .. } => {
                "Read a smaller file or raise max_file_size in the file engine configuration"
            }
            FsError::NotFound { .. } => "Check the path; list the parent directory to see what exists",
            FsError::BackupFailed { .. } => {
                "Check permissions on the backup directory, or retry with backup disabled"
            }
            FsError::InvalidPattern { .. } => "Fix the glob pattern syntax (e.g. '*.rs', '**/*.toml')",
            FsError::Io { .. } => "Check file permissions and available disk space",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(FsError::not_allowed("/x", "outside").code(), -32001);
        assert_eq!(
            FsError::FileTooLarge {
                path: "/x".into(),
                size: 2,
                max: 1
            }
            .code(),
            -32002
        );
        assert_eq!(FsError::NotFound { path: "/x".into() }.code(), -32003);
        assert_eq!(
            FsError::BackupFailed {
                path: "/x".into(),
                reason: "denied".into()
            }
            .code(),
            -32004
        );
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = FsError::io("/nope", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(err, FsError::NotFound { .. }));
        let err = FsError::io("/nope", std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(matches!(err, FsError::Io { .. }));
    }

    #[test]
    fn test_display_includes_path() {
        let err = FsError::not_allowed("/etc/passwd", "outside allowed roots");
        assert_eq!(
            err.to_string(),
            "path not allowed: /etc/passwd: outside allowed roots"
        );
    }
}
