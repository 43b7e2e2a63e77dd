use thiserror::Error;
use trading::GatewayError;

/// Global error type for the broker client.
///
/// Lookups of unknown order ids, handles or instruments are not errors; those
/// operations are silent no-ops.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The gateway session has not reached (or has left) the ready state.
    #[error("broker client is not ready")]
    NotReady,

    /// The process-wide client was torn down and is not rebuilt.
    #[error("broker client has been shut down")]
    ShutDown,

    /// Orders need a non-zero share count.
    #[error("order quantity must be non-zero")]
    InvalidQuantity,

    #[error("invalid limit price: {0}")]
    InvalidPrice(f64),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// A gateway primitive failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Underlying IO failure (thread spawn, recorder files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for broker client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
