//! Shared types and error definitions used by the chunkwise server and
//! client.
//!
//! ## Submodules
//!
//! - [`chunking`] - Chunk count, byte range and progress arithmetic.
//! - [`error`] - The upload error taxonomy and its stable wire codes.
//! - [`types`] - Session tokens, metadata and entity records.
//! - [`wire`] - Multipart field names and the JSON response body.

pub mod chunking;
pub mod error;
pub mod types;
pub mod wire;

pub use error::{Error, ErrorCode, Result};
pub use types::{CoverImage, EntityId, EntityTarget, MediaEntity, MediaMetadata, SessionToken};
pub use wire::{ChunkAck, ChunkResponse};
