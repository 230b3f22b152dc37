use thiserror::Error;

/// Errors returned by relay operations.
///
/// None of these are allowed to change the acknowledgement sent back to the
/// gateway; callers log them and fall back to a safe default response.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed notification: {0}")]
    MalformedInput(String),

    #[error("signature mismatch for order {0}")]
    SignatureMismatch(String),

    #[error("order system unavailable: {0}")]
    DownstreamUnavailable(String),

    #[error("order system rejected update with status {0}")]
    DownstreamRejected(u16),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
