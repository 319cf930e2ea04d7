//! Error types shared by the broker and the kv-store node.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("store with this name already exists: {0}")]
    StoreExists(String),

    #[error("no stores available")]
    NoStoresAvailable,

    #[error("{0}")]
    ClientError(String),

    #[error("{name} unreachable: {detail}")]
    NodeUnreachable { name: String, detail: String },

    #[error("{store} responded with status {status}")]
    UnexpectedStatus { store: String, status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Maps each variant onto the status code the HTTP surface reports.
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::KeyNotFound(_) | Error::StoreNotFound(_) => StatusCode::NOT_FOUND,
            Error::ClientError(_) | Error::StoreExists(_) => StatusCode::BAD_REQUEST,
            Error::NoStoresAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::NodeUnreachable { .. } | Error::UnexpectedStatus { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.to_http_status(), self.to_string()).into_response()
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
