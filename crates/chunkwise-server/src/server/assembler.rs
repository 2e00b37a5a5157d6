//! Turns a complete chunk set into a persisted media entity.
//!
//! The steps run strictly in this order:
//!
//! 1. Stream chunks `0..total_chunks` from the chunk store into a new video
//!    artifact.
//! 2. Compare the written length with the sum of the recorded chunk
//!    lengths. A mismatch deletes the new artifact.
//! 3. Write the cover image, if chunk 0 carried one.
//! 4. Call the entity store exactly once.
//! 5. Delete the artifacts the entity referenced before an update, only
//!    after the entity store confirmed the new references.
//!
//! The chunk set is purged afterwards whatever the outcome. A failure before
//! step 4 leaves any existing entity untouched. A failure in step 4 keeps the
//! new artifacts and records them in the [`OrphanLedger`].

use crate::server::artifact::{ArtifactStore, cover_key, video_key};
use crate::server::entity::{ArtifactRefs, EntityStore};
use crate::server::orphans::OrphanLedger;
use crate::server::store::{ChunkStore, ChunkStream};
use chunkwise_core::{CoverImage, EntityTarget, Error, MediaEntity, MediaMetadata, SessionToken};
use futures::StreamExt;
use std::sync::Arc;

/// Everything the assembler needs from a fully received session.
#[derive(Debug, Clone)]
pub struct AssemblyJob {
    pub session: SessionToken,
    pub total_chunks: u32,
    pub expected_bytes: u64,
    pub filename: String,
    pub target: EntityTarget,
    pub metadata: MediaMetadata,
    pub cover_image: Option<CoverImage>,
}

#[derive(Clone)]
pub struct Assembler {
    chunks: Arc<dyn ChunkStore>,
    artifacts: Arc<dyn ArtifactStore>,
    entities: Arc<dyn EntityStore>,
    orphans: Arc<OrphanLedger>,
}

impl Assembler {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        artifacts: Arc<dyn ArtifactStore>,
        entities: Arc<dyn EntityStore>,
        orphans: Arc<OrphanLedger>,
    ) -> Self {
        Self {
            chunks,
            artifacts,
            entities,
            orphans,
        }
    }

    #[tracing::instrument(skip_all, fields(session = %job.session, total_chunks = job.total_chunks))]
    pub async fn assemble(&self, job: AssemblyJob) -> Result<MediaEntity, Error> {
        let result = self.run(&job).await;
        if let Err(e) = self.chunks.purge(job.session).await {
            tracing::warn!(error = %e, "failed to purge chunks after assembly");
        }
        result
    }

    async fn run(&self, job: &AssemblyJob) -> Result<MediaEntity, Error> {
        let stream = self
            .chunks
            .get_all_ordered(job.session, job.total_chunks)
            .await
            .map_err(assembly_failed)?;

        let video = video_key(job.session, &job.filename);
        let written = self
            .artifacts
            .write(&video, stream)
            .await
            .map_err(assembly_failed)?;

        if written != job.expected_bytes {
            self.discard(&video).await;
            return Err(Error::AssemblyFailed {
                reason: format!(
                    "artifact has {written} bytes, chunks recorded {}",
                    job.expected_bytes
                ),
            });
        }
        tracing::debug!(key = %video, bytes = written, "video artifact written");

        let cover = match &job.cover_image {
            Some(image) => match self.write_cover(job.session, image).await {
                Ok(key) => Some(key),
                Err(e) => {
                    self.discard(&video).await;
                    return Err(e);
                }
            },
            None => None,
        };

        let refs = ArtifactRefs {
            video: video.clone(),
            cover: cover.clone(),
        };
        let outcome = match self
            .entities
            .persist(job.target.entity_id(), refs, &job.metadata)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = e.to_string();
                self.orphans.record(video, job.session, reason.clone());
                if let Some(cover) = cover {
                    self.orphans.record(cover, job.session, reason.clone());
                }
                return Err(Error::EntityPersistFailed { reason });
            }
        };

        for old in &outcome.replaced {
            if *old == video || Some(old) == cover.as_ref() {
                continue;
            }
            if let Err(e) = self.artifacts.delete(old).await {
                tracing::warn!(key = %old, error = %e, "failed to delete replaced artifact");
            }
        }

        Ok(outcome.entity)
    }

    async fn write_cover(&self, session: SessionToken, image: &CoverImage) -> Result<String, Error> {
        let key = cover_key(session, &image.filename);
        let stream: ChunkStream = futures::stream::once({
            let bytes = image.bytes.clone();
            async move { Ok(bytes) }
        })
        .boxed();
        let written = self
            .artifacts
            .write(&key, stream)
            .await
            .map_err(assembly_failed)?;
        if written != image.bytes.len() as u64 {
            self.discard(&key).await;
            return Err(Error::AssemblyFailed {
                reason: format!(
                    "cover image has {written} bytes, expected {}",
                    image.bytes.len()
                ),
            });
        }
        Ok(key)
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.artifacts.delete(key).await {
            tracing::warn!(key, error = %e, "failed to delete rejected artifact");
        }
    }
}

fn assembly_failed(err: impl std::fmt::Display) -> Error {
    Error::AssemblyFailed {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::artifact::MemoryArtifactStore;
    use crate::server::entity::MemoryEntityStore;
    use crate::server::store::MemoryChunkStore;
    use bytes::Bytes;

    struct Fixture {
        chunks: Arc<MemoryChunkStore>,
        artifacts: Arc<MemoryArtifactStore>,
        entities: Arc<MemoryEntityStore>,
        orphans: Arc<OrphanLedger>,
        assembler: Assembler,
    }

    fn fixture() -> Fixture {
        let chunks = Arc::new(MemoryChunkStore::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let entities = Arc::new(MemoryEntityStore::new());
        let orphans = Arc::new(OrphanLedger::new());
        let assembler = Assembler::new(
            chunks.clone(),
            artifacts.clone(),
            entities.clone(),
            orphans.clone(),
        );
        Fixture {
            chunks,
            artifacts,
            entities,
            orphans,
            assembler,
        }
    }

    fn job(session: SessionToken, total_chunks: u32, expected_bytes: u64) -> AssemblyJob {
        AssemblyJob {
            session,
            total_chunks,
            expected_bytes,
            filename: "clip.mp4".into(),
            target: EntityTarget::Create,
            metadata: MediaMetadata::new("clip"),
            cover_image: None,
        }
    }

    #[tokio::test]
    async fn concatenates_in_index_order() {
        let f = fixture();
        let session = SessionToken::mint();
        f.chunks.put(session, 1, Bytes::from_static(b"world")).await.unwrap();
        f.chunks.put(session, 0, Bytes::from_static(b"hello ")).await.unwrap();

        let entity = f.assembler.assemble(job(session, 2, 11)).await.unwrap();
        assert_eq!(entity.video_path, format!("videos/{session}/clip.mp4"));
        assert_eq!(
            f.artifacts.get(&entity.video_path).unwrap(),
            Bytes::from_static(b"hello world")
        );
        assert_eq!(f.chunks.chunk_count(session), 0);
    }

    #[tokio::test]
    async fn length_mismatch_fails_and_leaves_no_artifact() {
        let f = fixture();
        let session = SessionToken::mint();
        f.chunks.put(session, 0, Bytes::from_static(b"abc")).await.unwrap();

        let err = f.assembler.assemble(job(session, 1, 4)).await.unwrap_err();
        assert!(matches!(err, Error::AssemblyFailed { .. }));
        assert!(f.artifacts.keys().is_empty());
        assert!(f.entities.is_empty());
        assert_eq!(f.chunks.chunk_count(session), 0);
    }

    #[tokio::test]
    async fn missing_chunk_fails_assembly() {
        let f = fixture();
        let session = SessionToken::mint();
        f.chunks.put(session, 0, Bytes::from_static(b"abc")).await.unwrap();

        let err = f.assembler.assemble(job(session, 2, 3)).await.unwrap_err();
        assert!(matches!(err, Error::AssemblyFailed { .. }));
        assert!(f.artifacts.keys().is_empty());
    }

    #[tokio::test]
    async fn writes_cover_alongside_video() {
        let f = fixture();
        let session = SessionToken::mint();
        f.chunks.put(session, 0, Bytes::from_static(b"v")).await.unwrap();
        let mut job = job(session, 1, 1);
        job.cover_image = Some(CoverImage {
            filename: "../cover.png".into(),
            content_type: Some("image/png".into()),
            bytes: Bytes::from_static(b"png"),
        });

        let entity = f.assembler.assemble(job).await.unwrap();
        let cover = entity.cover_path.unwrap();
        assert_eq!(cover, format!("covers/{session}/cover.png"));
        assert_eq!(f.artifacts.get(&cover).unwrap(), Bytes::from_static(b"png"));
    }

    #[tokio::test]
    async fn update_deletes_previous_artifact_after_persist() {
        let f = fixture();
        let first = SessionToken::mint();
        f.chunks.put(first, 0, Bytes::from_static(b"old")).await.unwrap();
        let created = f.assembler.assemble(job(first, 1, 3)).await.unwrap();

        let second = SessionToken::mint();
        f.chunks.put(second, 0, Bytes::from_static(b"new!")).await.unwrap();
        let mut update = job(second, 1, 4);
        update.target = EntityTarget::Update(created.id.clone());
        let updated = f.assembler.assemble(update).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(f.artifacts.keys(), vec![updated.video_path.clone()]);
        assert_eq!(f.entities.get(&created.id).unwrap().video_path, updated.video_path);
    }

    #[tokio::test]
    async fn entity_failure_records_orphan() {
        let f = fixture();
        let session = SessionToken::mint();
        f.chunks.put(session, 0, Bytes::from_static(b"data")).await.unwrap();
        let mut job = job(session, 1, 4);
        job.target = EntityTarget::Update(chunkwise_core::EntityId::new("gone"));

        let err = f.assembler.assemble(job).await.unwrap_err();
        assert!(matches!(err, Error::EntityPersistFailed { .. }));

        let key = format!("videos/{session}/clip.mp4");
        assert!(f.artifacts.get(&key).is_some());
        let orphans = f.orphans.list();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].artifact_key, key);
        assert_eq!(orphans[0].session_token, session);
        assert_eq!(f.chunks.chunk_count(session), 0);
    }
}
