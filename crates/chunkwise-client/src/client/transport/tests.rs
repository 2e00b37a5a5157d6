use super::*;
use crate::client::splitter::{ChunkSplitter, FirstChunk};
use crate::client::upload::Uploader;
use axum::Router;
use axum::http::{HeaderMap as RequestHeaders, StatusCode};
use axum::routing::post;
use bytes::Bytes;
use chunkwise_core::{CoverImage, ErrorCode, MediaMetadata, SessionToken};
use chunkwise_server::server::{
    artifact::MemoryArtifactStore,
    assembler::Assembler,
    coordinator::{CoordinatorLimits, UploadCoordinator},
    entity::MemoryEntityStore,
    http::{AppState, router},
    orphans::OrphanLedger,
    registry::SessionRegistry,
    store::MemoryChunkStore,
};
use std::io::Cursor;
use std::sync::Arc;
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn upload_service() -> (Router, Arc<MemoryArtifactStore>) {
    let chunks = Arc::new(MemoryChunkStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let orphans = Arc::new(OrphanLedger::new());
    let assembler = Assembler::new(
        chunks.clone(),
        artifacts.clone(),
        Arc::new(MemoryEntityStore::new()),
        orphans.clone(),
    );
    let coordinator = Arc::new(UploadCoordinator::new(
        CoordinatorLimits::default(),
        Arc::new(SessionRegistry::new()),
        chunks,
        assembler,
    ));
    let app = router(
        AppState {
            coordinator,
            orphans,
        },
        16 * 1024 * 1024,
    );
    (app, artifacts)
}

fn unit(chunk_index: u32, total_chunks: u32) -> TransferUnit {
    TransferUnit {
        session_token: None,
        chunk_index,
        total_chunks,
        filename: "clip.mp4".into(),
        bytes: Bytes::from_static(b"payload"),
        first_chunk: Some(FirstChunk {
            target: EntityTarget::Create,
            metadata: MediaMetadata::new("Clip"),
            cover_image: None,
        }),
    }
}

#[tokio::test]
async fn upload_with_cover_over_http() {
    let (app, artifacts) = upload_service();
    let base = serve(app).await;
    let transport = HttpTransport::new(&base, None, TIMEOUT).unwrap();

    let data: Vec<u8> = (0..5_000u32).map(|i| (i % 97) as u8).collect();
    let mut metadata = MediaMetadata::new("Launch");
    metadata.category = Some("events".into());
    metadata.active = false;
    let mut splitter = ChunkSplitter::from_reader(
        Cursor::new(data.clone()),
        data.len() as u64,
        "launch.mp4",
        2_048,
        FirstChunk {
            target: EntityTarget::Create,
            metadata,
            cover_image: Some(CoverImage {
                filename: "poster.png".into(),
                content_type: Some("image/png".into()),
                bytes: Bytes::from_static(b"png"),
            }),
        },
    )
    .unwrap();

    let entity = Uploader::new(transport)
        .upload(&mut splitter, |_| {})
        .await
        .unwrap();

    assert_eq!(entity.title, "Launch");
    assert_eq!(entity.category.as_deref(), Some("events"));
    assert!(!entity.active);
    assert_eq!(&artifacts.get(&entity.video_path).unwrap()[..], &data[..]);
    let cover = entity.cover_path.unwrap();
    assert!(cover.ends_with("/poster.png"));
    assert_eq!(artifacts.get(&cover).unwrap(), Bytes::from_static(b"png"));
}

#[tokio::test]
async fn structured_rejection_is_decoded() {
    let (app, _) = upload_service();
    let transport = HttpTransport::new(&serve(app).await, None, TIMEOUT).unwrap();

    let err = transport.send(unit(5, 3)).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidChunkIndex));

    let mut stale = unit(1, 3);
    stale.session_token = Some(SessionToken::mint());
    stale.first_chunk = None;
    let err = transport.send(stale).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::UnknownOrExpiredSession));
}

#[tokio::test]
async fn bearer_token_is_forwarded() {
    async fn check(headers: RequestHeaders) -> Result<axum::Json<ChunkResponse>, StatusCode> {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
        if auth != Some("Bearer s3cret") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(axum::Json(
            ChunkAck {
                session_token: SessionToken::mint(),
                received_count: 1,
                total_chunks: 2,
                entity: None,
            }
            .into(),
        ))
    }
    let base = serve(Router::new().route(CHUNK_ENDPOINT, post(check))).await;

    let ack = HttpTransport::new(&base, Some("s3cret"), TIMEOUT)
        .unwrap()
        .send(unit(0, 2))
        .await
        .unwrap();
    assert_eq!(ack.received_count, 1);

    let err = HttpTransport::new(&base, None, TIMEOUT)
        .unwrap()
        .send(unit(0, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 401, .. }));
}

#[tokio::test]
async fn unstructured_failure_keeps_status_and_body() {
    async fn down() -> (StatusCode, &'static str) {
        (StatusCode::BAD_GATEWAY, "upstream down")
    }
    let base = serve(Router::new().route(CHUNK_ENDPOINT, post(down))).await;

    let err = HttpTransport::new(&base, None, TIMEOUT)
        .unwrap()
        .send(unit(0, 1))
        .await
        .unwrap_err();
    match err {
        ClientError::Status { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "upstream down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn endpoint_is_joined_to_the_base_url() {
    let transport = HttpTransport::new("http://media.local:8080/", None, TIMEOUT).unwrap();
    assert_eq!(
        transport.endpoint().as_str(),
        "http://media.local:8080/uploads/chunks"
    );

    assert!(matches!(
        HttpTransport::new("not a url", None, TIMEOUT),
        Err(ClientError::Config(_))
    ));
    assert!(matches!(
        HttpTransport::new("http://media.local", Some("bad\ntoken"), TIMEOUT),
        Err(ClientError::Config(_))
    ));
}
