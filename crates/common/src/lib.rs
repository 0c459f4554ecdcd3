//! Shared types for the session client workspace
//!
//! Configuration/I-O errors used by every binary, plus the `Secret` wrapper
//! that keeps passwords and tokens out of logs.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
