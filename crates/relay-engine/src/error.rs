use relay_core::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("turn cancelled")]
    Cancelled,

    #[error("stream ended without a final result")]
    Incomplete,
}
