use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Server errors and rate limiting are transient; client errors
    /// (4xx other than 429) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            BridgeError::Timeout(_) | BridgeError::Connect(_) => true,
            BridgeError::Io(_) => true,
            BridgeError::OperationFailed(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
