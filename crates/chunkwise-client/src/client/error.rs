use chunkwise_core::ErrorCode;
use std::io;

/// Everything that can stop an upload.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The server answered with a structured failure body.
    #[error("server rejected the chunk ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    /// The server answered with a non-2xx status and a body that is not a
    /// chunk response.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source file no longer matches the size it had when the upload
    /// started.
    #[error("source changed during upload: {reason}")]
    SourceChanged { reason: String },

    /// The upload could not be set up (bad chunk size, endpoint or token).
    #[error("invalid upload configuration: {0}")]
    Config(String),

    /// The server's answers do not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// The server's error code, when the failure was reported by the server.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<chunkwise_core::Error> for ClientError {
    fn from(err: chunkwise_core::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
