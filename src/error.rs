use thiserror::Error;

/// Errors surfaced by the streaming client.
///
/// Only `MissingEndpointConfig` is fatal (to the connection attempt). The rest
/// are reported to the user and the pipeline keeps running.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("camera access denied: {0}")]
    CameraAccessDenied(String),

    #[error("no WebSocket endpoint configured (set server.ws_url or KINETICOACH_WS_URL)")]
    MissingEndpointConfig,

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("malformed inbound envelope: {0}")]
    MalformedInboundEnvelope(String),

    #[error("file source requires a non-empty path")]
    EmptyFileHandle,

    #[error("media error: {0}")]
    MediaError(String),

    #[error("frame encode error: {0}")]
    EncodeError(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Recoverable errors are shown as a notice; the app keeps running.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ClientError::MissingEndpointConfig | ClientError::Config(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
