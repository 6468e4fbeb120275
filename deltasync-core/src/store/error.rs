use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the on-disk store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A partially committed update could not be rolled back.
    #[error("store left inconsistent: {0}")]
    Inconsistent(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_inconsistent(&self) -> bool {
        matches!(self, StoreError::Inconsistent(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
