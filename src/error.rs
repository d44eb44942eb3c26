//! Error kinds raised by package resolution, sessions and configuration.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZapperError {
    #[error("package(s) not found: {}", labels.join(", "))]
    PackageNotFound { labels: Vec<String> },

    #[error("cannot load {package}: {}", reasons.join("; "))]
    LoadPackage {
        package: String,
        reasons: Vec<String>,
    },

    #[error("cannot unload {package}: {}", reasons.join("; "))]
    UnloadPackage {
        package: String,
        reasons: Vec<String>,
    },

    #[error("session error: {0}")]
    Session(String),

    #[error("permission denied: {0}")]
    SessionAuth(String),

    #[error("cannot create session: {0}")]
    SessionCreation(String),

    #[error("invalid key=value pair '{0}'")]
    InvalidKeyValue(String),

    #[error("invalid value '{value}' for config key '{key}': {reason}")]
    InvalidConfigValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ZapperError {
    pub fn not_found<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ZapperError::PackageNotFound {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }
}
