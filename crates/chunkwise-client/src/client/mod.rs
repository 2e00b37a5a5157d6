//! Client side of the chunkwise upload protocol.
//!
//! ## Submodules
//!
//! - [`config`] - CLI arguments and their validation.
//! - [`error`] - [`ClientError`](error::ClientError), the failure of an upload.
//! - [`splitter`] - Sequential, bounded-memory chunking of a source file.
//! - [`transport`] - The [`ChunkTransport`](transport::ChunkTransport) seam and
//!   its HTTP implementation.
//! - [`upload`] - The sequential transfer driver.

pub mod config;
pub mod error;
pub mod splitter;
pub mod transport;
pub mod upload;
