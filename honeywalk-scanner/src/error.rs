use thiserror::Error;

/// Failure of a single page or resource fetch. The display text is what ends
/// up in `reason_failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Connection timeout for URL: {0}")]
    ConnectTimeout(String),

    #[error("Socket timeout for URL: {0}")]
    SocketTimeout(String),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Unsupported protocol. Probably not a resource: {0}")]
    UnsupportedProtocol(String),

    #[error("Connection error for URL: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Timeout when gathering ({millis} ms): {url}")]
    Timeout { url: String, millis: u64 },

    #[error("Overall time limit exceeded url: {0}")]
    Interrupted(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExceeded {
    #[error("Tree height limit reached ({limit})")]
    Height { limit: usize },

    #[error("Tree size limit reached ({limit})")]
    Size { limit: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("No page chain tracked for {url}")]
    Broken { url: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object not found: {0}")]
    NotFound(u64),

    #[error("Store closed to this worker")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("Invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },

    #[error("Invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Limit(#[from] LimitExceeded),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CrawlError>;
