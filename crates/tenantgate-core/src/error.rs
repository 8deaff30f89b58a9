//! Loader error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("extension already registered: {0}")]
    DuplicateSlug(String),

    #[error("extension not found: {0}")]
    NotFound(String),

    #[error("loading window closed, refusing extension: {0}")]
    LoadingClosed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Failure reported by an extension lifecycle hook.
///
/// Hook failures are recorded and logged by the coordinator; they never
/// abort a fan-out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{hook} hook failed: {reason}")]
pub struct HookError {
    pub hook: &'static str,
    pub reason: String,
}

impl HookError {
    pub fn new(hook: &'static str, reason: impl Into<String>) -> Self {
        Self {
            hook,
            reason: reason.into(),
        }
    }
}
