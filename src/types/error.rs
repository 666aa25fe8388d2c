use thiserror::Error;

/// Errors that can occur while synchronizing room state.
#[derive(Error, Debug)]
pub enum SyncError {
    /// WebSocket protocol error (handshake failed, invalid frame, etc.)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// General connection error with descriptive message
    #[error("Connection error: {0}")]
    Connection(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error (telemetry delivery)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error (malformed endpoint URL)
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Durable storage I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialized frame exceeds the configured maximum
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Demo generator has no layout for this hotel
    #[error("Unknown hotel: {0}")]
    UnknownHotel(String),
}

/// Reasons an inbound frame is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("frame is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("missing or non-string `type`")]
    MissingType,

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("missing or non-numeric `timestamp`")]
    MissingTimestamp,

    #[error("missing or non-string `messageId`")]
    MissingMessageId,
}

/// Convenience type alias for `Result<T, SyncError>`.
pub type Result<T> = std::result::Result<T, SyncError>;
