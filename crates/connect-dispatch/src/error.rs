use crate::outcome::ErrorKind;

/// Errors from consuming an [`Outcome`](crate::Outcome).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request failed: {kind}")]
    Request {
        kind: ErrorKind,
        status: Option<u16>,
    },

    #[error("decoding response body: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
