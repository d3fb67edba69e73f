//! Error types for the LINSTOR volume plugin
//!
//! Provides structured error types for configuration, controller access,
//! volume ownership, cluster metadata consistency, and local mount handling.

use thiserror::Error;

/// Unified error type for the plugin
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not convert '{size}': {reason}")]
    SizeParse { size: String, reason: String },

    #[error("Invalid value '{value}' for option '{key}': {reason}")]
    OptionDecode {
        key: String,
        value: String,
        reason: String,
    },

    // =========================================================================
    // Controller Errors
    // =========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Controller request failed ({status}): {message}")]
    Controller { status: u16, message: String },

    #[error("Controller connection error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Ownership Errors
    // =========================================================================
    #[error("Volume '{name}' is not managed by this plugin")]
    NotManaged { name: String },

    // =========================================================================
    // Consistency Errors
    // =========================================================================
    #[error("Volume '{name}' did not contain a file system key")]
    MissingFilesystem { name: String },

    #[error("Inconsistent cluster state: {0}")]
    Inconsistent(String),

    // =========================================================================
    // Local OS Errors
    // =========================================================================
    #[error("unable to get exclusive open on {device}")]
    DeviceInUse { device: String },

    #[error("{command} failed: {reason}")]
    MountFailed { command: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Coarse classification of an error, used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any remote call was made
    Configuration,
    /// Failure reported by (or on the way to) the controller
    Remote,
    /// Resource exists but is not owned by this plugin
    Ownership,
    /// Cluster metadata does not look the way this plugin left it
    Consistency,
    /// Local mount namespace or device failure
    Local,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Remote => "remote",
            ErrorKind::Ownership => "ownership",
            ErrorKind::Consistency => "consistency",
            ErrorKind::Local => "local",
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) | Error::SizeParse { .. } | Error::OptionDecode { .. } => {
                ErrorKind::Configuration
            }

            Error::NotFound(_) | Error::Controller { .. } | Error::Http(_) | Error::JsonParse(_) => {
                ErrorKind::Remote
            }

            Error::NotManaged { .. } => ErrorKind::Ownership,

            Error::MissingFilesystem { .. } | Error::Inconsistent(_) => ErrorKind::Consistency,

            Error::DeviceInUse { .. }
            | Error::MountFailed { .. }
            | Error::Io(_)
            | Error::Metrics(_) => ErrorKind::Local,
        }
    }

    /// Check if this is the controller's "object does not exist" answer
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias for the plugin
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::SizeParse {
            size: "lots".into(),
            reason: "invalid number".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = Error::NotManaged { name: "vol".into() };
        assert_eq!(err.kind(), ErrorKind::Ownership);

        let err = Error::MissingFilesystem { name: "vol".into() };
        assert_eq!(err.kind(), ErrorKind::Consistency);

        let err = Error::DeviceInUse {
            device: "/dev/drbd1000".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Local);
    }

    #[test]
    fn test_not_found_detection() {
        assert!(Error::NotFound("resource vol on node-a".into()).is_not_found());
        assert!(!Error::Controller {
            status: 500,
            message: "boom".into()
        }
        .is_not_found());
    }

    #[test]
    fn test_messages() {
        let err = Error::NotManaged { name: "web".into() };
        assert_eq!(err.to_string(), "Volume 'web' is not managed by this plugin");

        let err = Error::DeviceInUse {
            device: "/dev/drbd1001".into(),
        };
        assert_eq!(err.to_string(), "unable to get exclusive open on /dev/drbd1001");
    }
}
