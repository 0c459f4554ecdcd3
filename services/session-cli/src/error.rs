//! Command-line errors

use thiserror::Error;

/// Errors from parsing the command line or preparing a command.
#[derive(Error, Debug)]
pub enum Error {
    #[error("usage: {0}")]
    Usage(String),

    #[error("missing {0}: set it in the config file or environment")]
    MissingSetting(&'static str),

    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Result alias using CLI Error
pub type Result<T> = std::result::Result<T, Error>;
