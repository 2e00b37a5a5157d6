//! Error types for the chunked upload protocol.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of a chunk submission. Each variant maps to a stable
//! [`ErrorCode`] that travels in the JSON response body, so clients can react
//! to the failure without parsing the human-readable message.
//!
//! ## Error Cases
//! - `InvalidRequest`: The submission was malformed (missing fields, bad
//!   numbers, missing metadata on the first chunk).
//! - `InvalidChunkIndex`: The chunk index lies outside `[0, total_chunks)`.
//! - `SessionConflict`: `total_chunks` differs from the value recorded when
//!   the session was established.
//! - `UnknownOrExpiredSession`: The session token is unknown, malformed, or
//!   the session was purged by the expiry sweep.
//! - `StorageWriteFailed`: The chunk could not be persisted; the same index
//!   may be retried.
//! - `AssemblyFailed`: Concatenation or its integrity check failed.
//! - `EntityPersistFailed`: The artifact was written but the owning entity
//!   could not be saved.

use serde::{Deserialize, Serialize};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for chunk submission.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The request was malformed or violated a configured limit.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The chunk index is negative or not below `total_chunks`.
    #[error("Chunk index {index} is outside [0, {total_chunks})")]
    InvalidChunkIndex { index: i64, total_chunks: u32 },

    /// `total_chunks` disagrees with the value fixed by the first chunk.
    #[error("Session expects {expected} chunks, request declared {got}")]
    SessionConflict { expected: u32, got: u32 },

    /// No live session exists for the supplied token.
    #[error("Unknown or expired upload session")]
    UnknownOrExpiredSession,

    /// The chunk payload could not be written to the chunk store.
    #[error("Chunk could not be stored: {reason}")]
    StorageWriteFailed { reason: String },

    /// The complete chunk set could not be turned into a verified artifact.
    #[error("Assembly failed: {reason}")]
    AssemblyFailed { reason: String },

    /// The artifact exists but the owning entity rejected or failed the save.
    #[error("Owning entity could not be saved: {reason}")]
    EntityPersistFailed { reason: String },
}

impl Error {
    /// Returns the stable wire code for this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Error::InvalidChunkIndex { .. } => ErrorCode::InvalidChunkIndex,
            Error::SessionConflict { .. } => ErrorCode::SessionConflict,
            Error::UnknownOrExpiredSession => ErrorCode::UnknownOrExpiredSession,
            Error::StorageWriteFailed { .. } => ErrorCode::StorageWriteFailed,
            Error::AssemblyFailed { .. } => ErrorCode::AssemblyFailed,
            Error::EntityPersistFailed { .. } => ErrorCode::EntityPersistFailed,
        }
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Error::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Whether the client may resubmit the same chunk within the same
    /// session after this error.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageWriteFailed { .. })
    }
}

/// Machine-readable error identifiers carried in the response `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidChunkIndex,
    SessionConflict,
    UnknownOrExpiredSession,
    StorageWriteFailed,
    AssemblyFailed,
    EntityPersistFailed,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidChunkIndex => "invalid_chunk_index",
            ErrorCode::SessionConflict => "session_conflict",
            ErrorCode::UnknownOrExpiredSession => "unknown_or_expired_session",
            ErrorCode::StorageWriteFailed => "storage_write_failed",
            ErrorCode::AssemblyFailed => "assembly_failed",
            ErrorCode::EntityPersistFailed => "entity_persist_failed",
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_snake_case() {
        let err = Error::InvalidChunkIndex {
            index: 5,
            total_chunks: 3,
        };
        let json = serde_json::to_string(&err.code()).unwrap();
        assert_eq!(json, "\"invalid_chunk_index\"");
        assert_eq!(err.code().as_str(), "invalid_chunk_index");
    }

    #[test]
    fn serde_and_as_str_agree() {
        let all = [
            ErrorCode::InvalidRequest,
            ErrorCode::InvalidChunkIndex,
            ErrorCode::SessionConflict,
            ErrorCode::UnknownOrExpiredSession,
            ErrorCode::StorageWriteFailed,
            ErrorCode::AssemblyFailed,
            ErrorCode::EntityPersistFailed,
        ];
        for code in all {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(
            Error::StorageWriteFailed {
                reason: "disk full".into()
            }
            .is_retryable()
        );
        assert!(!Error::UnknownOrExpiredSession.is_retryable());
        assert!(
            !Error::AssemblyFailed {
                reason: "short".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn messages_name_the_offending_values() {
        let err = Error::SessionConflict {
            expected: 3,
            got: 4,
        };
        assert_eq!(
            err.to_string(),
            "Session expects 3 chunks, request declared 4"
        );
    }
}
