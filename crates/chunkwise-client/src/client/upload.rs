//! Sequential transfer driver.
//!
//! Chunks are sent one at a time in index order. The token returned for chunk
//! 0 is attached to every later unit. The first failure ends the upload and is
//! returned unchanged; nothing is retried.

#[cfg(test)]
mod tests;

use crate::client::error::ClientError;
use crate::client::splitter::ChunkSplitter;
use crate::client::transport::ChunkTransport;
use chunkwise_core::chunking::progress_percent;
use chunkwise_core::{MediaEntity, SessionToken};
use tokio::io::AsyncRead;

/// Progress after an acknowledged chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub acknowledged: u32,
    pub total_chunks: u32,
    pub percent: f64,
}

pub struct Uploader<T> {
    transport: T,
}

impl<T: ChunkTransport> Uploader<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Drives `splitter` to completion and returns the entity the final
    /// acknowledgement carries.
    #[tracing::instrument(
        skip_all,
        fields(filename = splitter.filename(), total_chunks = splitter.total_chunks())
    )]
    pub async fn upload<R, F>(
        &self,
        splitter: &mut ChunkSplitter<R>,
        mut on_progress: F,
    ) -> Result<MediaEntity, ClientError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(Progress),
    {
        let total_chunks = splitter.total_chunks();
        let mut session: Option<SessionToken> = None;
        let mut acknowledged = 0u32;

        while let Some(mut unit) = splitter.next_unit().await? {
            unit.session_token = session;
            let index = unit.chunk_index;
            let is_last = unit.is_last();

            let ack = match self.transport.send(unit).await {
                Ok(ack) => ack,
                Err(err) => {
                    tracing::warn!(chunk_index = index, "chunk upload failed: {err}");
                    return Err(err);
                }
            };

            match session {
                None => {
                    tracing::debug!(session_token = %ack.session_token, "session established");
                    session = Some(ack.session_token);
                }
                Some(expected) if expected != ack.session_token => {
                    return Err(ClientError::Protocol(format!(
                        "chunk {index} acknowledged for session {}, expected {expected}",
                        ack.session_token
                    )));
                }
                Some(_) => {}
            }
            if ack.total_chunks != total_chunks {
                return Err(ClientError::Protocol(format!(
                    "server reports {} chunks, upload has {total_chunks}",
                    ack.total_chunks
                )));
            }

            acknowledged += 1;
            on_progress(Progress {
                acknowledged,
                total_chunks,
                percent: progress_percent(acknowledged, total_chunks),
            });

            if is_last {
                return ack.entity.ok_or_else(|| {
                    ClientError::Protocol("final chunk acknowledged without an entity".into())
                });
            }
        }

        Err(ClientError::Protocol("source produced no final chunk".into()))
    }
}
