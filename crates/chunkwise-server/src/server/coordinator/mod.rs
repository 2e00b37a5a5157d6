//! Upload session coordinator.
//!
//! [`UploadCoordinator::submit_chunk`] is the single entry point for chunk
//! submissions. For each call it:
//!
//! - validates the request against the configured limits and, for an
//!   existing session, against the values fixed by chunk 0; nothing is
//!   written before validation passes,
//! - stores the payload under `(session, index)` within the per-chunk write
//!   timeout,
//! - records the index in the session,
//! - and, once every index has arrived, runs assembly synchronously under
//!   the session's assembly lock.
//!
//! Chunk writes are idempotent and completeness is a set test, so arrival
//! order does not matter. Late deliveries to a session that is already
//! assembling or finished observe its outcome instead of writing again.


use crate::server::assembler::{Assembler, AssemblyJob};
use crate::server::registry::{NewSession, SessionHandle, SessionRegistry, SessionStatus};
use crate::server::store::ChunkStore;
use crate::server::telemetry::{
    decrement_sessions_inflight, increment_assemblies, increment_chunk_errors,
    increment_chunks_received, increment_sessions_inflight, record_assembly_duration,
    record_chunk_bytes,
};
use bytes::Bytes;
use chunkwise_core::{ChunkAck, CoverImage, EntityTarget, Error, MediaMetadata, SessionToken};
use core::time::Duration;
use std::sync::Arc;

/// Request-size and timing limits enforced by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorLimits {
    pub max_chunk_bytes: usize,
    pub max_cover_bytes: usize,
    pub max_total_chunks: u32,
    pub chunk_write_timeout: Duration,
}

impl Default for CoordinatorLimits {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 8 * 1024 * 1024,
            max_cover_bytes: 10 * 1024 * 1024,
            max_total_chunks: 65_536,
            chunk_write_timeout: Duration::from_secs(30),
        }
    }
}

/// Fields only chunk 0 carries.
#[derive(Debug, Clone)]
pub struct FirstChunk {
    pub target: EntityTarget,
    pub metadata: MediaMetadata,
    pub cover_image: Option<CoverImage>,
}

/// One decoded chunk submission.
///
/// Index and count are kept signed so that negative values coming off the
/// wire are reported as the protocol errors they are rather than as parse
/// failures.
#[derive(Debug, Clone)]
pub struct SubmitChunk {
    pub session_token: Option<SessionToken>,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub filename: String,
    pub bytes: Bytes,
    /// Ignored unless this call opens a new session.
    pub first_chunk: Option<FirstChunk>,
}

pub struct UploadCoordinator {
    limits: CoordinatorLimits,
    registry: Arc<SessionRegistry>,
    chunks: Arc<dyn ChunkStore>,
    assembler: Assembler,
}

impl UploadCoordinator {
    pub fn new(
        limits: CoordinatorLimits,
        registry: Arc<SessionRegistry>,
        chunks: Arc<dyn ChunkStore>,
        assembler: Assembler,
    ) -> Self {
        Self {
            limits,
            registry,
            chunks,
            assembler,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accepts one chunk and returns the session's progress.
    ///
    /// The acknowledgement carries the entity only when this call completed
    /// the session (or observed a session another call completed).
    #[tracing::instrument(
        skip_all,
        fields(
            session = ?req.session_token,
            index = req.chunk_index,
            total = req.total_chunks,
            bytes = req.bytes.len(),
        )
    )]
    pub async fn submit_chunk(&self, req: SubmitChunk) -> Result<ChunkAck, Error> {
        let result = self.submit(req).await;
        if let Err(e) = &result {
            increment_chunk_errors(e.code().as_str());
            tracing::info!(error = %e, "chunk rejected");
        }
        result
    }

    async fn submit(&self, req: SubmitChunk) -> Result<ChunkAck, Error> {
        let total_chunks = self.check_total(req.total_chunks)?;
        let index = check_index(req.chunk_index, total_chunks)?;
        if req.bytes.len() > self.limits.max_chunk_bytes {
            return Err(Error::invalid_request(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                req.bytes.len(),
                self.limits.max_chunk_bytes
            )));
        }

        let (handle, created) = match req.session_token {
            Some(token) => (self.existing_session(token, total_chunks)?, false),
            None => {
                if index != 0 {
                    return Err(Error::invalid_request(
                        "session_token is required after the first chunk",
                    ));
                }
                (self.open_session(total_chunks, req.filename, req.first_chunk)?, true)
            }
        };
        let token = handle.token();

        let status = handle.state().status.clone();
        match status {
            SessionStatus::Pending => {}
            SessionStatus::Expired => return Err(Error::UnknownOrExpiredSession),
            _ => return self.observe_outcome(&handle).await,
        }

        let written = match tokio::time::timeout(
            self.limits.chunk_write_timeout,
            self.chunks.put(token, index, req.bytes),
        )
        .await
        {
            Ok(Ok(written)) => written,
            Ok(Err(e)) => {
                return Err(self.write_failed(&handle, created, e.to_string()).await);
            }
            Err(_) => {
                let reason = format!(
                    "write did not finish within {:?}",
                    self.limits.chunk_write_timeout
                );
                return Err(self.write_failed(&handle, created, reason).await);
            }
        };
        increment_chunks_received();
        record_chunk_bytes(written);

        let recorded = handle.state().record_chunk(index, written);
        let received_count = match recorded {
            Ok(count) => count,
            Err(SessionStatus::Expired) => {
                // Swept while the write was in flight.
                self.purge(token).await;
                return Err(Error::UnknownOrExpiredSession);
            }
            Err(_) => {
                let outcome = self.observe_outcome(&handle).await;
                self.purge(token).await;
                return outcome;
            }
        };
        tracing::debug!(received_count, total_chunks, "chunk recorded");

        if received_count < total_chunks {
            return Ok(ChunkAck {
                session_token: token,
                received_count,
                total_chunks,
                entity: None,
            });
        }

        self.complete(&handle).await
    }

    fn check_total(&self, total_chunks: i64) -> Result<u32, Error> {
        if total_chunks <= 0 {
            return Err(Error::invalid_request("total_chunks must be greater than 0"));
        }
        match u32::try_from(total_chunks) {
            Ok(total) if total <= self.limits.max_total_chunks => Ok(total),
            _ => Err(Error::invalid_request(format!(
                "total_chunks {total_chunks} exceeds the limit of {}",
                self.limits.max_total_chunks
            ))),
        }
    }

    fn existing_session(
        &self,
        token: SessionToken,
        total_chunks: u32,
    ) -> Result<Arc<SessionHandle>, Error> {
        let handle = self
            .registry
            .get(&token)
            .ok_or(Error::UnknownOrExpiredSession)?;
        let expected = handle.state().total_chunks;
        if expected != total_chunks {
            return Err(Error::SessionConflict {
                expected,
                got: total_chunks,
            });
        }
        Ok(handle)
    }

    fn open_session(
        &self,
        total_chunks: u32,
        filename: String,
        first_chunk: Option<FirstChunk>,
    ) -> Result<Arc<SessionHandle>, Error> {
        let Some(first) = first_chunk else {
            return Err(Error::invalid_request("the first chunk must carry metadata"));
        };
        first.metadata.validate()?;
        if filename.trim().is_empty() {
            return Err(Error::invalid_request("filename must not be empty"));
        }
        if let Some(cover) = &first.cover_image {
            if cover.bytes.len() > self.limits.max_cover_bytes {
                return Err(Error::invalid_request(format!(
                    "cover image of {} bytes exceeds the {} byte limit",
                    cover.bytes.len(),
                    self.limits.max_cover_bytes
                )));
            }
        }

        let handle = self.registry.create(NewSession {
            total_chunks,
            filename,
            target: first.target,
            metadata: first.metadata,
            cover_image: first.cover_image,
        });
        increment_sessions_inflight();
        tracing::info!(session = %handle.token(), total_chunks, "upload session opened");
        Ok(handle)
    }

    /// A session opened by this very call holds nothing yet, so it is
    /// dropped and the client retries without a token. Older sessions stay
    /// open for a retry of the same index.
    ///
    /// A dropped session is no longer visible to the sweeper, so whatever
    /// the failed or timed-out write left in the chunk store is purged here.
    async fn write_failed(&self, handle: &SessionHandle, created: bool, reason: String) -> Error {
        let token = handle.token();
        tracing::warn!(session = %token, %reason, "chunk write failed");
        if created {
            if self.registry.remove(&token).is_some() {
                decrement_sessions_inflight();
            }
            self.purge(token).await;
        }
        Error::StorageWriteFailed { reason }
    }

    /// Runs assembly once for a fully received session. Concurrent callers
    /// queue on the assembly lock and then read the stored outcome.
    async fn complete(&self, handle: &SessionHandle) -> Result<ChunkAck, Error> {
        let _guard = handle.assembly_lock().lock().await;

        let job = {
            let mut state = handle.state();
            if state.status != SessionStatus::Pending || !state.is_fully_received() {
                drop(state);
                return self.read_outcome(handle);
            }
            state.status = SessionStatus::Assembling;
            state.touch();
            AssemblyJob {
                session: state.token,
                total_chunks: state.total_chunks,
                expected_bytes: state.total_bytes(),
                filename: state.filename.clone(),
                target: state.target.clone(),
                metadata: state.metadata.clone(),
                cover_image: state.cover_image.take(),
            }
        };

        let started = tokio::time::Instant::now();
        let result = self.assembler.assemble(job).await;
        record_assembly_duration(started.elapsed().as_secs_f64() * 1000.0);
        decrement_sessions_inflight();

        let mut state = handle.state();
        state.touch();
        match result {
            Ok(entity) => {
                increment_assemblies("complete");
                tracing::info!(session = %state.token, entity = %entity.id, "upload complete");
                state.status = SessionStatus::Complete(entity.clone());
                Ok(ChunkAck {
                    session_token: state.token,
                    received_count: state.received_count(),
                    total_chunks: state.total_chunks,
                    entity: Some(entity),
                })
            }
            Err(e) => {
                increment_assemblies("failed");
                tracing::error!(session = %state.token, error = %e, "assembly failed");
                state.status = SessionStatus::Failed(e.clone());
                Err(e)
            }
        }
    }

    async fn observe_outcome(&self, handle: &SessionHandle) -> Result<ChunkAck, Error> {
        let _guard = handle.assembly_lock().lock().await;
        self.read_outcome(handle)
    }

    fn read_outcome(&self, handle: &SessionHandle) -> Result<ChunkAck, Error> {
        let state = handle.state();
        match &state.status {
            SessionStatus::Complete(entity) => Ok(ChunkAck {
                session_token: state.token,
                received_count: state.received_count(),
                total_chunks: state.total_chunks,
                entity: Some(entity.clone()),
            }),
            SessionStatus::Failed(e) => Err(e.clone()),
            SessionStatus::Expired => Err(Error::UnknownOrExpiredSession),
            SessionStatus::Pending | SessionStatus::Assembling => Ok(ChunkAck {
                session_token: state.token,
                received_count: state.received_count(),
                total_chunks: state.total_chunks,
                entity: None,
            }),
        }
    }

    async fn purge(&self, token: SessionToken) {
        if let Err(e) = self.chunks.purge(token).await {
            tracing::warn!(session = %token, error = %e, "failed to purge chunks");
        }
    }
}

fn check_index(chunk_index: i64, total_chunks: u32) -> Result<u32, Error> {
    match u32::try_from(chunk_index) {
        Ok(index) if index < total_chunks => Ok(index),
        _ => Err(Error::InvalidChunkIndex {
            index: chunk_index,
            total_chunks,
        }),
    }
}
