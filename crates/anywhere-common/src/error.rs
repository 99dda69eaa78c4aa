use thiserror::Error;

/// Errors produced while parsing WireGuard configuration text
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing [{0}] section")]
    MissingSection(&'static str),

    #[error("Line {line}: duplicate [Interface] section")]
    DuplicateInterface { line: usize },

    #[error("Line {line}: unknown section [{section}]")]
    UnknownSection { line: usize, section: String },

    #[error("Line {line}: key outside of any section")]
    KeyOutsideSection { line: usize },

    #[error("Line {line}: expected 'Key = Value'")]
    MalformedLine { line: usize },

    #[error("Line {line}: unknown key '{key}'")]
    UnknownKey { line: usize, key: String },

    #[error("Line {line}: '{key}' specified more than once")]
    DuplicateKey { line: usize, key: String },

    #[error("Line {line}: invalid {key}: {reason}")]
    InvalidValue {
        line: usize,
        key: String,
        reason: String,
    },

    #[error("[{section}] is missing required key '{key}'")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(line: usize, key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            line,
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
