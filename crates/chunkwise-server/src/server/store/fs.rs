use super::{ChunkStore, ChunkStream, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use chunkwise_core::SessionToken;
use futures::{StreamExt, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Filesystem chunk store.
///
/// Layout: `<root>/<session token>/<index>.chunk`. A chunk is first written
/// to a uniquely named temporary file in the same directory and then renamed
/// into place, so a failed or interrupted write never replaces a chunk that
/// was already stored.
pub struct FsChunkStore {
    root: PathBuf,
    next_temp: AtomicU64,
}

impl FsChunkStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            next_temp: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session: SessionToken) -> PathBuf {
        self.root.join(session.to_string())
    }

    fn chunk_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("{index:010}.chunk"))
    }

    async fn write_atomic(&self, dir: &Path, index: u32, bytes: &[u8]) -> io::Result<()> {
        let n = self.next_temp.fetch_add(1, Ordering::Relaxed);
        let temp = dir.join(format!(".{index:010}.chunk.{n}.partial"));

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp, Self::chunk_path(dir, index)).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp).await;
        }
        result
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn put(
        &self,
        session: SessionToken,
        index: u32,
        bytes: Bytes,
    ) -> Result<u64, StoreError> {
        let dir = self.session_dir(session);
        fs::create_dir_all(&dir).await?;
        self.write_atomic(&dir, index, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn get_all_ordered(
        &self,
        session: SessionToken,
        total_chunks: u32,
    ) -> Result<ChunkStream, StoreError> {
        let dir = self.session_dir(session);
        let mut paths = Vec::with_capacity(total_chunks as usize);
        let mut missing = Vec::new();
        for index in 0..total_chunks {
            let path = Self::chunk_path(&dir, index);
            if fs::try_exists(&path).await? {
                paths.push(path);
            } else {
                missing.push(index);
            }
        }
        if !missing.is_empty() {
            return Err(StoreError::Incomplete { missing });
        }

        let stream = futures::stream::iter(paths.into_iter().map(Ok::<_, io::Error>))
            .and_then(|path| async move { fs::File::open(path).await })
            .map_ok(ReaderStream::new)
            .try_flatten();
        Ok(stream.boxed())
    }

    async fn purge(&self, session: SessionToken) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.session_dir(session)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
