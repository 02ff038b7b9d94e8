use thiserror::Error;

use crate::types::ResultPage;

#[derive(Debug, Error)]
pub enum Error {
    /// Connection refused, timeout, unreachable host: the request never got a usable answer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The engine answered with a structured error envelope for the whole request.
    #[error("[{status}] {kind}: {reason}")]
    Response { status: u16, kind: String, reason: String },

    #[error("Scroll cursor is exhausted; start a new query")]
    CursorExhausted,

    #[error("Malformed engine response: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Error::Decode(e.to_string()) }
}

/// A paginated collection that stopped early.
///
/// `pages` holds everything fetched before `source` occurred, in arrival order.
#[derive(Debug, Error)]
#[error("collection stopped after {} page(s): {source}", .pages.len())]
pub struct CollectError {
    pub pages: Vec<ResultPage>,
    #[source]
    pub source: Error,
}
