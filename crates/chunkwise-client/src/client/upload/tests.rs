use super::*;
use crate::client::splitter::{FirstChunk, TransferUnit};
use async_trait::async_trait;
use chunkwise_core::chunking::DEFAULT_CHUNK_SIZE;
use chunkwise_core::{
    ChunkAck, EntityId, EntityTarget, Error, ErrorCode, MediaEntity, MediaMetadata,
};
use chunkwise_server::server::{
    artifact::MemoryArtifactStore,
    assembler::Assembler,
    coordinator::{self, CoordinatorLimits, SubmitChunk, UploadCoordinator},
    entity::MemoryEntityStore,
    orphans::OrphanLedger,
    registry::SessionRegistry,
    store::MemoryChunkStore,
};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;

fn first(title: &str) -> FirstChunk {
    FirstChunk {
        target: EntityTarget::Create,
        metadata: MediaMetadata::new(title),
        cover_image: None,
    }
}

fn splitter(data: Vec<u8>, chunk_size: u64) -> ChunkSplitter<Cursor<Vec<u8>>> {
    let size = data.len() as u64;
    ChunkSplitter::from_reader(Cursor::new(data), size, "clip.mp4", chunk_size, first("Clip"))
        .unwrap()
}

fn entity(title: &str) -> MediaEntity {
    MediaEntity {
        id: EntityId::new("1"),
        title: title.to_string(),
        category: None,
        date: None,
        content: None,
        active: true,
        video_path: "videos/x/clip.mp4".into(),
        cover_path: None,
        created_at: 0,
        updated_at: 0,
    }
}

/// Acknowledges every unit it sees, optionally failing one index.
struct ScriptedTransport {
    token: SessionToken,
    sent: Mutex<Vec<TransferUnit>>,
    fail_at: Option<u32>,
    entity_on_final: bool,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            token: SessionToken::mint(),
            sent: Mutex::new(Vec::new()),
            fail_at: None,
            entity_on_final: true,
        }
    }
}

#[async_trait]
impl ChunkTransport for ScriptedTransport {
    async fn send(&self, unit: TransferUnit) -> Result<ChunkAck, ClientError> {
        let index = unit.chunk_index;
        let total_chunks = unit.total_chunks;
        let is_last = unit.is_last();
        self.sent.lock().push(unit);
        if self.fail_at == Some(index) {
            return Err(ClientError::Rejected {
                code: ErrorCode::StorageWriteFailed,
                message: "disk full".into(),
            });
        }
        Ok(ChunkAck {
            session_token: self.token,
            received_count: index + 1,
            total_chunks,
            entity: (is_last && self.entity_on_final).then(|| entity("Clip")),
        })
    }
}

/// Hands units straight to an in-process coordinator.
struct LocalTransport {
    coordinator: Arc<UploadCoordinator>,
}

#[async_trait]
impl ChunkTransport for LocalTransport {
    async fn send(&self, unit: TransferUnit) -> Result<ChunkAck, ClientError> {
        let req = SubmitChunk {
            session_token: unit.session_token,
            chunk_index: unit.chunk_index.into(),
            total_chunks: unit.total_chunks.into(),
            filename: unit.filename,
            bytes: unit.bytes,
            first_chunk: unit.first_chunk.map(|first| coordinator::FirstChunk {
                target: first.target,
                metadata: first.metadata,
                cover_image: first.cover_image,
            }),
        };
        self.coordinator
            .submit_chunk(req)
            .await
            .map_err(|err: Error| ClientError::Rejected {
                code: err.code(),
                message: err.to_string(),
            })
    }
}

fn local() -> (LocalTransport, Arc<MemoryArtifactStore>) {
    let chunks = Arc::new(MemoryChunkStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let assembler = Assembler::new(
        chunks.clone(),
        artifacts.clone(),
        Arc::new(MemoryEntityStore::new()),
        Arc::new(OrphanLedger::new()),
    );
    let coordinator = Arc::new(UploadCoordinator::new(
        CoordinatorLimits::default(),
        Arc::new(SessionRegistry::new()),
        chunks,
        assembler,
    ));
    (LocalTransport { coordinator }, artifacts)
}

#[tokio::test]
async fn progress_follows_each_acknowledgement() {
    let transport = ScriptedTransport::new();
    let mut progress = Vec::new();
    let entity = Uploader::new(&transport)
        .upload(&mut splitter(vec![1; 10], 4), |p| progress.push(p))
        .await
        .unwrap();

    assert_eq!(entity.title, "Clip");
    let acknowledged: Vec<u32> = progress.iter().map(|p| p.acknowledged).collect();
    assert_eq!(acknowledged, vec![1, 2, 3]);
    assert!(progress.iter().all(|p| p.total_chunks == 3));
    assert!((progress[0].percent - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(progress[2].percent, 100.0);
}

#[tokio::test]
async fn token_from_first_ack_rides_on_later_chunks() {
    let transport = ScriptedTransport::new();
    Uploader::new(&transport)
        .upload(&mut splitter(vec![1; 10], 4), |_| {})
        .await
        .unwrap();

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].session_token, None);
    assert!(sent[0].first_chunk.is_some());
    for unit in &sent[1..] {
        assert_eq!(unit.session_token, Some(transport.token));
        assert!(unit.first_chunk.is_none());
    }
}

#[tokio::test]
async fn first_failure_stops_the_upload() {
    let transport = ScriptedTransport {
        fail_at: Some(1),
        ..ScriptedTransport::new()
    };
    let mut calls = 0;
    let err = Uploader::new(&transport)
        .upload(&mut splitter(vec![1; 12], 4), |_| calls += 1)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::StorageWriteFailed));
    assert_eq!(transport.sent.lock().len(), 2);
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn final_ack_must_carry_the_entity() {
    let transport = ScriptedTransport {
        entity_on_final: false,
        ..ScriptedTransport::new()
    };
    let err = Uploader::new(&transport)
        .upload(&mut splitter(vec![1; 5], 4), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}

#[tokio::test]
async fn five_mib_round_trip_through_the_coordinator() {
    let (transport, artifacts) = local();
    let data: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let mut source = splitter(data.clone(), DEFAULT_CHUNK_SIZE);
    assert_eq!(source.total_chunks(), 3);

    let mut last = None;
    let entity = Uploader::new(transport)
        .upload(&mut source, |p| last = Some(p))
        .await
        .unwrap();

    assert_eq!(last.map(|p| p.acknowledged), Some(3));
    assert_eq!(entity.title, "Clip");
    assert!(entity.video_path.ends_with("/clip.mp4"));
    assert_eq!(&artifacts.get(&entity.video_path).unwrap()[..], &data[..]);
}

#[tokio::test]
async fn coordinator_rejection_is_surfaced_unchanged() {
    let (transport, artifacts) = local();
    let mut source = ChunkSplitter::from_reader(
        Cursor::new(vec![3u8; 8]),
        8,
        "clip.mp4",
        4,
        FirstChunk {
            target: EntityTarget::Update(EntityId::new("missing")),
            ..first("Clip")
        },
    )
    .unwrap();

    let err = Uploader::new(transport)
        .upload(&mut source, |_| {})
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::EntityPersistFailed));
    // The artifact stays behind as an orphan.
    assert_eq!(artifacts.keys().len(), 1);
}
