//! Temporary storage for chunk payloads.
//!
//! Chunks live here only while their session is open. The store is keyed by
//! `(session, index)` and knows nothing about session state: the coordinator
//! decides when a chunk set is complete and when it is purged.
//!
//! Two implementations are provided:
//!
//! - [`FsChunkStore`] - one directory per session, one file per chunk.
//! - [`MemoryChunkStore`] - a process-local map, used in tests and benches.

mod fs;
mod memory;

pub use fs::FsChunkStore;
pub use memory::MemoryChunkStore;

use async_trait::async_trait;
use bytes::Bytes;
use chunkwise_core::SessionToken;
use futures::stream::BoxStream;
use std::io;

/// Ordered byte stream over every chunk of a session.
pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chunk store I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Returned by [`ChunkStore::get_all_ordered`] instead of a partial
    /// stream.
    #[error("chunk set is incomplete, missing indices {missing:?}")]
    Incomplete { missing: Vec<u32> },
}

#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Stores the payload of chunk `index`, replacing any earlier payload
    /// for the same index. Returns the number of bytes written.
    async fn put(&self, session: SessionToken, index: u32, bytes: Bytes)
    -> Result<u64, StoreError>;

    /// Streams chunks `0..total_chunks` in ascending index order.
    ///
    /// Fails with [`StoreError::Incomplete`] when any index is absent; no
    /// bytes are yielded in that case.
    async fn get_all_ordered(
        &self,
        session: SessionToken,
        total_chunks: u32,
    ) -> Result<ChunkStream, StoreError>;

    /// Removes every chunk of the session. Purging an unknown session is not
    /// an error.
    async fn purge(&self, session: SessionToken) -> Result<(), StoreError>;
}
