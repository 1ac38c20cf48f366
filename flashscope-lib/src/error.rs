use thiserror::Error;

/// Convenient result type for `flashscope-lib`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("integer parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("format error: {0}")]
    Format(String),

    #[error("read of {len} bytes at offset {offset} exceeds buffer of {available} bytes")]
    Bounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timeout while {0}")]
    Timeout(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no {0} partition in partition table")]
    PartitionNotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Errors raised by the read/write collaborator rather than by a decoder.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Serial(_)
                | Self::Transport(_)
                | Self::Protocol(_)
                | Self::Timeout(_)
        )
    }

    /// Structured decoders report out-of-range field reads as malformed input.
    pub(crate) fn into_format(self) -> Self {
        match self {
            Self::Bounds {
                offset,
                len,
                available,
            } => Self::Format(format!(
                "field of {} bytes at offset {} runs past end of {}-byte buffer",
                len, offset, available
            )),
            other => other,
        }
    }
}
