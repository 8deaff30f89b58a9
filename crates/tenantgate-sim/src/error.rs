//! Simulator error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}
