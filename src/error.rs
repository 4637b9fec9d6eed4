use thiserror::Error;

/// Engine error taxonomy. Transport errors trigger backoff-retry, protocol
/// errors drop the offending frame, integrity errors force a full
/// resubscribe-and-resnapshot, and unsupported symbols are surfaced without
/// ever opening a transport.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("integrity: checksum mismatch (expected {expected}, computed {computed})")]
    Integrity { expected: u32, computed: u32 },

    #[error("unsupported symbol {symbol} on {exchange}")]
    Unsupported { exchange: &'static str, symbol: String },
}

impl EngineError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
