use thiserror::Error;

/// Errors propagated to callers of this crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("The item {item:?} could not be fetched: {reason}")]
    Fetch { item: String, reason: String },
    #[error("No source for {0}")]
    NoSource(String),
    #[error("No package record for {0}")]
    RecordNotFound(String),
    #[error("No download location for {0}")]
    NoUri(String),
    #[error("Malformed control data: {0}")]
    Parse(String),
    #[error("Failed to unpack source package: {0}")]
    Unpack(String),
    #[error("Package engine error: {0}")]
    Engine(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of the problem resolver to bring the broken count down to zero
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Unable to correct problems, {0} package(s) still broken")]
    Unresolvable(usize),
    #[error("Problem resolver failed: {0}")]
    Internal(String),
}

/// Failure to open a remote resource
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("Resource not found")]
    NotFound,
    #[error("Server returned HTTP status {0}")]
    Http(u16),
    #[error("Connection failed: {0}")]
    Connection(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => TransportError::NotFound,
            Some(status) => TransportError::Http(status.as_u16()),
            None => TransportError::Connection(e.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Connection(e.to_string())
    }
}
