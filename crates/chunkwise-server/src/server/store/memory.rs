use super::{ChunkStore, ChunkStream, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use chunkwise_core::SessionToken;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
pub struct MemoryChunkStore {
    sessions: Mutex<HashMap<SessionToken, BTreeMap<u32, Bytes>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently held for `session`.
    pub fn chunk_count(&self, session: SessionToken) -> usize {
        self.sessions.lock().get(&session).map_or(0, BTreeMap::len)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(
        &self,
        session: SessionToken,
        index: u32,
        bytes: Bytes,
    ) -> Result<u64, StoreError> {
        let len = bytes.len() as u64;
        self.sessions
            .lock()
            .entry(session)
            .or_default()
            .insert(index, bytes);
        Ok(len)
    }

    async fn get_all_ordered(
        &self,
        session: SessionToken,
        total_chunks: u32,
    ) -> Result<ChunkStream, StoreError> {
        let sessions = self.sessions.lock();
        let chunks = sessions.get(&session);
        let missing: Vec<u32> = (0..total_chunks)
            .filter(|i| !chunks.is_some_and(|c| c.contains_key(i)))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Incomplete { missing });
        }

        // Bytes clones are reference-counted, not copies.
        let ordered: Vec<Bytes> = chunks
            .map(|c| c.range(..total_chunks).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default();
        Ok(futures::stream::iter(ordered.into_iter().map(Ok)).boxed())
    }

    async fn purge(&self, session: SessionToken) -> Result<(), StoreError> {
        self.sessions.lock().remove(&session);
        Ok(())
    }
}
