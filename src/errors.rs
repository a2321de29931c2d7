//! Error kinds shared across the crate.
//!
//! Internal APIs return `Result<T>` rather than the sentinel ints and
//! fatal-abort conventions of the original tool; callers that need the
//! latter behavior (the CLI) print `Display` and exit nonzero themselves.

use std::fmt;
use std::path::PathBuf;

/// Crate-wide error type. One variant per error kind.
#[derive(Debug)]
pub enum CrossbowError {
    /// Archive magic/version mismatch, truncation, or a missing required file.
    Archive {
        path: Option<PathBuf>,
        detail: String,
    },
    /// Vocabulary lookup or mode violation (e.g. closed-mode lookup of an
    /// unknown term bubbling up past the sentinel-id contract).
    Vocabulary { detail: String },
    /// A log/exp result went non-finite, or a probability computation hit a
    /// near-zero denominator that could not be bailed out of gracefully.
    Numerical { detail: String },
    /// Argument/config validation failure, raised before any I/O.
    InvalidArgument { detail: String },
    /// Wrapped I/O error.
    Io(std::io::Error),
}

impl fmt::Display for CrossbowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrossbowError::Archive { path, detail } => match path {
                Some(p) => write!(f, "archive error ({}): {detail}", p.display()),
                None => write!(f, "archive error: {detail}"),
            },
            CrossbowError::Vocabulary { detail } => write!(f, "vocabulary error: {detail}"),
            CrossbowError::Numerical { detail } => write!(f, "numerical error: {detail}"),
            CrossbowError::InvalidArgument { detail } => {
                write!(f, "invalid argument: {detail}")
            }
            CrossbowError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CrossbowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrossbowError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CrossbowError {
    fn from(e: std::io::Error) -> Self {
        CrossbowError::Io(e)
    }
}

impl CrossbowError {
    pub fn archive(detail: impl Into<String>) -> Self {
        CrossbowError::Archive {
            path: None,
            detail: detail.into(),
        }
    }

    pub fn archive_at(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        CrossbowError::Archive {
            path: Some(path.into()),
            detail: detail.into(),
        }
    }

    pub fn vocabulary(detail: impl Into<String>) -> Self {
        CrossbowError::Vocabulary {
            detail: detail.into(),
        }
    }

    pub fn numerical(detail: impl Into<String>) -> Self {
        CrossbowError::Numerical {
            detail: detail.into(),
        }
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        CrossbowError::InvalidArgument {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CrossbowError>;
