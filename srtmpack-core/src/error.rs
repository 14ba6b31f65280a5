use std::fmt;

#[derive(Debug)]
pub enum DownloadError {
    /// Tile identifier failed validation before any I/O was attempted.
    InvalidTileId(String),
    /// Transport-level failure after the retry budget was exhausted.
    Network(String),
    /// Non-404 HTTP error status from the origin.
    Http { status: u16, tile_id: String },
    /// The session (or a single request) was cancelled.
    Aborted,
    /// Payload could not be inflated or failed the format sanity check.
    Decompress(String),
    /// Cache store I/O failure.
    Storage(String),
    /// Broken internal invariant. Session-fatal.
    Internal(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::InvalidTileId(id) => write!(f, "Invalid tile id: {}", id),
            DownloadError::Network(msg) => write!(f, "Network error: {}", msg),
            DownloadError::Http { status, tile_id } => {
                write!(f, "HTTP {} fetching tile {}", status, tile_id)
            }
            DownloadError::Aborted => write!(f, "Download aborted"),
            DownloadError::Decompress(msg) => write!(f, "Failed to decompress: {}", msg),
            DownloadError::Storage(msg) => write!(f, "Storage error: {}", msg),
            DownloadError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

impl From<std::io::Error> for DownloadError {
    fn from(error: std::io::Error) -> Self {
        DownloadError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(error: serde_json::Error) -> Self {
        DownloadError::Storage(error.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        DownloadError::Network(error.to_string())
    }
}
