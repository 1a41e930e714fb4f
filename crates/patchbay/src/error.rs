use std::time::Duration;

use patchbay_wire::{ResponseCode, WireError};
use thiserror::Error;

/// Errors surfaced by the patchbay runtime and client facades.
#[derive(Debug, Error)]
pub enum PatchbayError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener failed while accepting: {0}")]
    Accept(#[source] std::io::Error),
    #[error("connection is closed")]
    Disconnected,
    #[error("no response within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("request failed with rcode {code:?}")]
    Response { code: ResponseCode },
    #[error("no provider available for method `{method}`")]
    NoProvider { method: String },
    #[error("method `{method}` is already registered")]
    DuplicateMethod { method: String },
    #[error("peer sent a malformed response: {0}")]
    MalformedResponse(&'static str),
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),
}

impl PatchbayError {
    /// The wire rcode a peer reported, when this error carries one.
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            PatchbayError::Response { code } => Some(*code),
            PatchbayError::Disconnected => Some(ResponseCode::Disconnected),
            _ => None,
        }
    }
}
