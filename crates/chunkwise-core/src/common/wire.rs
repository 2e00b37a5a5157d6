//! Wire format of the chunk submission endpoint.
//!
//! Requests are `multipart/form-data` bodies posted to [`CHUNK_ENDPOINT`];
//! the field names are the `FIELD_*` constants below. Responses are the JSON
//! [`ChunkResponse`] for both success and failure, so a client only needs one
//! decoder.

use crate::{ErrorCode, MediaEntity, SessionToken};
use serde::{Deserialize, Serialize};

/// Path of the chunk submission endpoint, relative to the server root.
pub const CHUNK_ENDPOINT: &str = "/uploads/chunks";

/// Binary payload of the chunk.
pub const FIELD_CHUNK: &str = "chunk";
pub const FIELD_CHUNK_INDEX: &str = "chunk_index";
pub const FIELD_TOTAL_CHUNKS: &str = "total_chunks";
pub const FIELD_FILENAME: &str = "filename";
/// Omitted only on the first call of a session.
pub const FIELD_SESSION_TOKEN: &str = "session_token";

// Metadata fields, read from chunk 0 only.
pub const FIELD_ENTITY_ID: &str = "entity_id";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_CATEGORY: &str = "category";
pub const FIELD_DATE: &str = "date";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_ACTIVE: &str = "active";
pub const FIELD_COVER_IMAGE: &str = "cover_image";

/// Parses the `active` form field the way HTML forms and the reference
/// client send it.
pub fn parse_active_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// A successfully accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAck {
    pub session_token: SessionToken,
    pub received_count: u32,
    pub total_chunks: u32,
    /// Present only on the acknowledgement that completed the session.
    pub entity: Option<MediaEntity>,
}

/// JSON body returned by the chunk submission endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<SessionToken>,
    #[serde(default)]
    pub received_count: u32,
    #[serde(default)]
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<MediaEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl ChunkResponse {
    pub fn rejected(
        error: &crate::Error,
        session_token: Option<SessionToken>,
        received_count: u32,
        total_chunks: u32,
    ) -> Self {
        Self {
            success: false,
            session_token,
            received_count,
            total_chunks,
            entity: None,
            message: Some(error.to_string()),
            error: Some(error.code()),
        }
    }

    /// Splits the body back into an acknowledgement or the reported failure.
    ///
    /// A body claiming success without a session token is reported as an
    /// `invalid_request` failure.
    pub fn into_result(self) -> Result<ChunkAck, (ErrorCode, String)> {
        if !self.success {
            let code = self.error.unwrap_or(ErrorCode::InvalidRequest);
            let message = self.message.unwrap_or_else(|| code.to_string());
            return Err((code, message));
        }
        let Some(session_token) = self.session_token else {
            return Err((
                ErrorCode::InvalidRequest,
                "response is missing the session token".to_string(),
            ));
        };
        Ok(ChunkAck {
            session_token,
            received_count: self.received_count,
            total_chunks: self.total_chunks,
            entity: self.entity,
        })
    }
}

impl From<ChunkAck> for ChunkResponse {
    fn from(ack: ChunkAck) -> Self {
        let message = ack
            .entity
            .as_ref()
            .map(|_| "upload complete".to_string());
        Self {
            success: true,
            session_token: Some(ack.session_token),
            received_count: ack.received_count,
            total_chunks: ack.total_chunks,
            entity: ack.entity,
            message,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn active_flag_accepts_form_spellings() {
        assert_eq!(parse_active_flag("true"), Some(true));
        assert_eq!(parse_active_flag(" ON "), Some(true));
        assert_eq!(parse_active_flag("0"), Some(false));
        assert_eq!(parse_active_flag("maybe"), None);
    }

    #[test]
    fn intermediate_ack_omits_entity() {
        let token = SessionToken::mint();
        let body = ChunkResponse::from(ChunkAck {
            session_token: token,
            received_count: 1,
            total_chunks: 3,
            entity: None,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["received_count"], 1);
        assert!(json.get("entity").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn rejection_carries_code_and_message() {
        let err = Error::InvalidChunkIndex {
            index: 5,
            total_chunks: 3,
        };
        let body = ChunkResponse::rejected(&err, None, 0, 3);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "invalid_chunk_index");

        let (code, message) = body.into_result().unwrap_err();
        assert_eq!(code, ErrorCode::InvalidChunkIndex);
        assert_eq!(message, err.to_string());
    }

    #[test]
    fn success_without_token_is_malformed() {
        let body = ChunkResponse {
            success: true,
            session_token: None,
            received_count: 1,
            total_chunks: 1,
            entity: None,
            message: None,
            error: None,
        };
        assert_eq!(body.into_result().unwrap_err().0, ErrorCode::InvalidRequest);
    }
}
