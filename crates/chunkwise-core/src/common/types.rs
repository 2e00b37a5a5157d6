//! # Session, Metadata and Entity Types
//!
//! These types form the contract between the chunk splitter, the upload
//! coordinator and the owning-entity collaborator.
//!
//! ## Session tokens
//!
//! A [`SessionToken`] is minted by the server when chunk 0 establishes a new
//! upload session. It wraps a [`ULID`] from [`ferroid`] and is rendered as the
//! 26-character Crockford Base32 string. Tokens are opaque to clients: they
//! are never derived from the filename or the owning entity, so two concurrent
//! uploads of identically named files can never collide.
//!
//! ## Metadata
//!
//! [`MediaMetadata`] is captured from the first chunk only. Fields sent with
//! later chunks are ignored by the server.

use crate::Error;
use bytes::Bytes;
use core::fmt;
use core::str::FromStr;
use ferroid::{base32::Base32UlidExt, id::ULID};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque identifier of one upload session.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(ULID);

impl SessionToken {
    /// Mints a fresh token from the current time and thread-local randomness.
    pub fn mint() -> Self {
        Self(ULID::now())
    }

    /// Parses a token previously returned by the server.
    ///
    /// Anything that does not decode as a ULID is reported as
    /// [`Error::UnknownOrExpiredSession`]: a malformed token can never name a
    /// live session.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        ULID::decode(raw.trim())
            .map(Self)
            .map_err(|_| Error::UnknownOrExpiredSession)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.encode())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({self})")
    }
}

impl FromStr for SessionToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Identifier of an owning entity (a media catalog record).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mints a new, time-ordered identifier for a freshly created entity.
    pub fn mint() -> Self {
        Self(ULID::now().encode().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which owning entity the finished artifact attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntityTarget {
    /// A new entity is created on successful assembly.
    #[default]
    Create,
    /// The media of an existing entity is replaced.
    Update(EntityId),
}

impl EntityTarget {
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            EntityTarget::Create => None,
            EntityTarget::Update(id) => Some(id),
        }
    }
}

/// Descriptive fields of a media record, sent with chunk 0 only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl MediaMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: None,
            date: None,
            content: None,
            active: true,
        }
    }

    /// Checks the fields the server requires before opening a session.
    pub fn validate(&self) -> Result<(), Error> {
        if self.title.trim().is_empty() {
            return Err(Error::invalid_request("title must not be empty"));
        }
        Ok(())
    }
}

/// Optional cover image accompanying chunk 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// The persisted owning record returned once an upload completes.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntity {
    pub id: EntityId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub active: bool,
    pub video_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_path: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_display_parses_back() {
        let token = SessionToken::mint();
        let rendered = token.to_string();
        assert_eq!(rendered.len(), 26);
        assert_eq!(SessionToken::parse(&rendered).unwrap(), token);
    }

    #[test]
    fn minted_tokens_are_distinct() {
        let a = SessionToken::mint();
        let b = SessionToken::mint();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_token_is_unknown_session() {
        assert_eq!(
            SessionToken::parse("video.mp4"),
            Err(Error::UnknownOrExpiredSession)
        );
        assert_eq!(SessionToken::parse(""), Err(Error::UnknownOrExpiredSession));
    }

    #[test]
    fn token_serializes_as_string() {
        let token = SessionToken::mint();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{token}\""));
        let back: SessionToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn metadata_requires_title() {
        assert!(MediaMetadata::new("  ").validate().is_err());
        assert!(MediaMetadata::new("Launch day").validate().is_ok());
    }

    #[test]
    fn metadata_defaults_to_active() {
        let meta: MediaMetadata = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert!(meta.active);
        assert_eq!(meta.category, None);
    }

    #[test]
    fn update_target_exposes_entity_id() {
        let id = EntityId::new("42");
        assert_eq!(EntityTarget::Update(id.clone()).entity_id(), Some(&id));
        assert_eq!(EntityTarget::Create.entity_id(), None);
    }
}
