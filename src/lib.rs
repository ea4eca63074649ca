//! Gavel - a video acquisition pipeline for legislative archives
//!
//! This library discovers archival recordings published by the House archive
//! page and the Senate hosting API, resolves directly retrievable stream URLs
//! through per-source fallback chains, and advances every video through a
//! persistent download -> audio extraction -> transcription state machine.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod sweeper;
pub mod transcribe;
pub mod utils;
pub mod worker;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use store::{Source, VideoRecord, VideoStore};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error taxonomy for the acquisition pipeline
#[derive(thiserror::Error, Debug)]
pub enum GavelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("stage precondition violated: {0}")]
    StagePrecondition(String),

    #[error("video record not found: {0}")]
    RecordNotFound(String),

    #[error("subprocess failed: {0}")]
    Subprocess(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GavelError {
    /// Whether an error is worth retrying inline with backoff.
    ///
    /// Only network and timeout failures qualify; content-validation and
    /// subprocess failures indicate a wrong URL or a broken input and must go
    /// back through resolution instead of being replayed against the same URL.
    pub fn is_transient(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<GavelError>(),
            Some(GavelError::Network(_)) | Some(GavelError::Timeout(_))
        )
    }
}
