//! Cuts a source into transfer units.
//!
//! The splitter reads its source strictly in order and never holds more than
//! the chunk it is about to hand out. The chunk count is fixed from the size
//! observed when the splitter is opened; a source that ends early or keeps
//! growing past that size aborts the upload with
//! [`ClientError::SourceChanged`].

use crate::client::error::ClientError;
use bytes::{Bytes, BytesMut};
use chunkwise_core::chunking;
use chunkwise_core::{CoverImage, EntityTarget, MediaMetadata, SessionToken};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Payload that travels with chunk 0 only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstChunk {
    pub target: EntityTarget,
    pub metadata: MediaMetadata,
    pub cover_image: Option<CoverImage>,
}

/// One chunk request, ready for a [`ChunkTransport`](crate::client::transport::ChunkTransport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    /// Filled in by the upload driver for every chunk after the first.
    pub session_token: Option<SessionToken>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub filename: String,
    pub bytes: Bytes,
    pub first_chunk: Option<FirstChunk>,
}

impl TransferUnit {
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.total_chunks
    }
}

pub struct ChunkSplitter<R = File> {
    reader: R,
    filename: String,
    size: u64,
    chunk_size: u64,
    total_chunks: u32,
    next_index: u32,
    first_chunk: Option<FirstChunk>,
}

impl ChunkSplitter<File> {
    /// Opens `path` and sizes the upload from its current length.
    pub async fn open(
        path: impl AsRef<Path>,
        chunk_size: u64,
        first_chunk: FirstChunk,
    ) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ClientError::Config(format!("{} is not a file", path.display())))?;
        Self::from_reader(file, size, filename, chunk_size, first_chunk)
    }
}

impl<R> ChunkSplitter<R>
where
    R: AsyncRead + Unpin,
{
    /// Splits `size` bytes read from `reader`.
    pub fn from_reader(
        reader: R,
        size: u64,
        filename: impl Into<String>,
        chunk_size: u64,
        first_chunk: FirstChunk,
    ) -> Result<Self, ClientError> {
        let total_chunks = chunking::total_chunks(size, chunk_size)?;
        Ok(Self {
            reader,
            filename: filename.into(),
            size,
            chunk_size,
            total_chunks,
            next_index: 0,
            first_chunk: Some(first_chunk),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Reads the next chunk, or `None` once every chunk has been produced.
    pub async fn next_unit(&mut self) -> Result<Option<TransferUnit>, ClientError> {
        if self.next_index >= self.total_chunks {
            return Ok(None);
        }
        let index = self.next_index;
        let range = chunking::chunk_range(index, self.size, self.chunk_size);
        let len = usize::try_from(range.end - range.start)
            .map_err(|_| ClientError::Config("chunk size exceeds addressable memory".into()))?;

        let mut buf = BytesMut::zeroed(len);
        if let Err(err) = self.reader.read_exact(&mut buf).await {
            return Err(match err.kind() {
                io::ErrorKind::UnexpectedEof => ClientError::SourceChanged {
                    reason: format!("ended before byte {} of {}", range.end, self.size),
                },
                _ => ClientError::Io(err),
            });
        }

        self.next_index += 1;
        if self.next_index == self.total_chunks {
            self.ensure_exhausted().await?;
        }

        Ok(Some(TransferUnit {
            session_token: None,
            chunk_index: index,
            total_chunks: self.total_chunks,
            filename: self.filename.clone(),
            bytes: buf.freeze(),
            first_chunk: if index == 0 {
                self.first_chunk.take()
            } else {
                None
            },
        }))
    }

    async fn ensure_exhausted(&mut self) -> Result<(), ClientError> {
        let mut probe = [0u8; 1];
        if self.reader.read(&mut probe).await? != 0 {
            return Err(ClientError::SourceChanged {
                reason: format!("grew past its initial {} bytes", self.size),
            });
        }
        Ok(())
    }
}
