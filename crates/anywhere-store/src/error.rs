use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// File IO error
    #[error("Failed to access store file '{path}': {message}")]
    FileError { path: PathBuf, message: String },

    /// Store file exists but is not a valid document
    #[error("Store file '{path}' is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// A stored value could not be (de)serialized as the requested type
    #[error("Value for key '{key}' could not be decoded: {message}")]
    Decode { key: String, message: String },

    #[error("Value for key '{key}' could not be encoded: {message}")]
    Encode { key: String, message: String },
}

impl StoreError {
    pub fn file(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::FileError {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn decode(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            key: key.into(),
            message: err.to_string(),
        }
    }
}
