//! Error taxonomy shared by the fetchers, the storage backends and the
//! persistence coordinator.
//!
//! Storage errors are classified so callers can decide without string
//! matching whether to retry, fall back, or treat the condition as
//! "first run":
//!
//! | Variant | Retried | Meaning for the pipeline |
//! |---------|---------|--------------------------|
//! | [`StorageError::Unauthenticated`] | no | fatal for the source |
//! | [`StorageError::NotFound`] | no | no dataset yet, first run |
//! | [`StorageError::TransientIo`] | yes | timeout, reset, throttling |
//! | [`StorageError::Corrupt`] | no | payload unreadable, merged as absent |
//! | [`StorageError::Backend`] | no | permanent rejection by the transport |

use crate::storage::StorageLocator;
use std::fmt;
use thiserror::Error;

/// Flat classification of every failure the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Fetch,
    Unauthenticated,
    NotFound,
    TransientIo,
    Corrupt,
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Backend => "backend",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by any [`StorageBackend`](crate::storage::StorageBackend) variant.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing or rejected credentials.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Nothing stored at the locator yet.
    #[error("not found: {0}")]
    NotFound(StorageLocator),

    /// Timeout, connection reset, rate limit or a 5xx from the remote.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// A payload exists but does not decode as a dataset.
    #[error("corrupt dataset at {locator}: {reason}")]
    Corrupt {
        locator: StorageLocator,
        reason: String,
    },

    /// The transport refused the request for a reason retrying won't fix.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::TransientIo(_) => ErrorKind::TransientIo,
            StorageError::Corrupt { .. } => ErrorKind::Corrupt,
            StorageError::Backend(_) => ErrorKind::Backend,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match e.kind() {
            Io::PermissionDenied | Io::ReadOnlyFilesystem | Io::InvalidInput => {
                StorageError::Backend(e.to_string())
            }
            _ => StorageError::TransientIo(e.to_string()),
        }
    }
}

/// Errors from the fetch layer. Ordinary network and status failures are
/// recovered inside the fetcher; only configuration problems
/// ([`FetchError::InvalidSelector`], [`FetchError::InvalidUrl`]) leave it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid CSS selector `{0}`")]
    InvalidSelector(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use crate::storage::Version;

    #[test]
    fn test_error_kinds() {
        assert_eq!(StorageError::TransientIo("reset".into()).kind(), ErrorKind::TransientIo);
        assert_eq!(
            StorageError::Unauthenticated("no key".into()).kind(),
            ErrorKind::Unauthenticated
        );
        assert_eq!(StorageError::Backend("400".into()).kind(), ErrorKind::Backend);
        let corrupt = StorageError::Corrupt {
            locator: StorageLocator::new(Source::LiveMint, Version::Latest, "x.csv"),
            reason: "bad row".into(),
        };
        assert_eq!(corrupt.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_io_error_classification() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(StorageError::from(denied).kind(), ErrorKind::Backend);
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(StorageError::from(reset).kind(), ErrorKind::TransientIo);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::TransientIo.to_string(), "transient_io");
        assert_eq!(ErrorKind::Unauthenticated.to_string(), "unauthenticated");
    }
}
