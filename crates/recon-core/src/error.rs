use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the reconciliation pipeline.
#[derive(Error, Debug)]
pub enum ReconError {
    /// The requested date window is not `start <= end <= today`.
    #[error("Invalid date range: {0}")]
    InvalidWindow(String),

    /// The export backend answered with a non-success status.
    #[error("Export request failed with status {status}: {body}")]
    Transport { status: u16, body: String },

    /// The export request never produced a response (DNS, TLS, timeout...).
    #[error("Export request error: {0}")]
    Http(#[from] reqwest::Error),

    /// A line of the raw export is not a JSON object.
    #[error("Malformed export data on line {line}: {source}")]
    MalformedExport {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The uploaded roster could not be decoded or parsed.
    #[error("Could not read roster: {0}")]
    RosterParse(String),

    /// The roster lacks a column the merge depends on.
    #[error("Uploaded file must contain {0} column")]
    MissingColumn(String),

    /// The roster file extension is not one we know how to read.
    #[error("Unsupported roster format: {0}")]
    UnsupportedFormat(String),

    /// A running amount total left the representable decimal range.
    #[error("Amount total for {0} exceeds the supported range")]
    AmountOverflow(String),

    /// A merge was requested before any successful fetch for the session.
    #[error("No reconciled data cached for session {0}")]
    NoReconciledData(String),

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing or reading delimited text failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconError {
    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Only network failures, throttling and server-side errors qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconError::Transport { status, .. } => *status == 429 || *status >= 500,
            ReconError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the recon crates.
pub type Result<T> = std::result::Result<T, ReconError>;
