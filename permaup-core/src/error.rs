//! Error taxonomy shared by the planner, signer, upload driver and pipeline.

use std::path::PathBuf;

/// Errors produced while preparing or uploading one manifest row.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input: empty filename, zero chunk size, unsafe path, changed file.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Wallet key missing, malformed, or not the transaction owner.
    #[error("signing error: {0}")]
    Signing(String),

    #[error("transaction is already signed")]
    AlreadySigned,

    /// Transport-level failure; the same request may be retried.
    #[error("network error: {0}")]
    Network(String),

    /// The gateway refused the request (bad chunk, bad header).
    #[error("server rejected request: {0}")]
    ServerRejected(String),

    #[error("upload of {tx_id} aborted after {attempts} attempt(s): {reason}")]
    UploadAborted { tx_id: String, attempts: u32, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// `Network` and `ServerRejected` may succeed when retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::ServerRejected(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
