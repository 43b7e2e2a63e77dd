use thiserror::Error;

/// Failures reported by a `Gateway` primitive.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The primitive requires an established session.
    #[error("gateway is not connected")]
    NotConnected,

    /// The broker refused the request.
    #[error("request rejected by gateway: {0}")]
    Rejected(String),

    /// Socket level failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway error: {0}")]
    Other(String),
}

/// A specialized Result type for gateway primitives.
pub type Result<T> = std::result::Result<T, GatewayError>;
