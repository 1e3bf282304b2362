//! herald — conversational assistant for announcement records and their
//! PDF attachments.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod runtime;
pub mod session;
pub mod store;
pub mod tools;
pub mod utils;

/// Return the herald home directory.
///
/// Resolution order:
/// 1. `HERALD_HOME` environment variable
/// 2. `$HOME/.herald`
pub fn herald_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("HERALD_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".herald")
    }
}
