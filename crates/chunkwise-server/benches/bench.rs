use bytes::Bytes;
use chunkwise_core::{EntityTarget, MediaMetadata, SessionToken};
use chunkwise_server::server::{
    artifact::{FsArtifactStore, MemoryArtifactStore},
    assembler::{Assembler, AssemblyJob},
    entity::MemoryEntityStore,
    orphans::OrphanLedger,
    store::{ChunkStore, FsChunkStore, MemoryChunkStore},
};
use core::hint::black_box;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Builder;

const CHUNK_SIZE: usize = 2 * 1024 * 1024;

fn job(session: SessionToken, total_chunks: u32) -> AssemblyJob {
    AssemblyJob {
        session,
        total_chunks,
        expected_bytes: total_chunks as u64 * CHUNK_SIZE as u64,
        filename: "bench.mp4".into(),
        target: EntityTarget::Create,
        metadata: MediaMetadata::new("bench"),
        cover_image: None,
    }
}

async fn fill(store: &dyn ChunkStore, session: SessionToken, total_chunks: u32, chunk: &Bytes) {
    for index in 0..total_chunks {
        store
            .put(session, index, chunk.clone())
            .await
            .expect("put failed");
    }
}

fn bench_assembly_memory(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let chunk = Bytes::from(vec![0xA5u8; CHUNK_SIZE]);

    let mut group = c.benchmark_group("assembly/memory");
    for total_chunks in [1u32, 8, 32] {
        group.throughput(Throughput::Bytes(total_chunks as u64 * CHUNK_SIZE as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(total_chunks),
            &total_chunks,
            |b, &total_chunks| {
                let chunks = Arc::new(MemoryChunkStore::new());
                let assembler = Assembler::new(
                    chunks.clone(),
                    Arc::new(MemoryArtifactStore::new()),
                    Arc::new(MemoryEntityStore::new()),
                    Arc::new(OrphanLedger::new()),
                );
                b.to_async(&rt).iter(|| {
                    let chunks = chunks.clone();
                    let assembler = assembler.clone();
                    let chunk = chunk.clone();
                    async move {
                        let session = SessionToken::mint();
                        fill(chunks.as_ref(), session, total_chunks, &chunk).await;
                        black_box(assembler.assemble(job(session, total_chunks)).await)
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_assembly_fs(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    let (chunks, artifacts) = rt.block_on(async {
        (
            Arc::new(
                FsChunkStore::open(dir.path().join("chunks"))
                    .await
                    .expect("chunk store"),
            ),
            Arc::new(
                FsArtifactStore::open(dir.path().join("artifacts"))
                    .await
                    .expect("artifact store"),
            ),
        )
    });
    let assembler = Assembler::new(
        chunks.clone(),
        artifacts,
        Arc::new(MemoryEntityStore::new()),
        Arc::new(OrphanLedger::new()),
    );
    let chunk = Bytes::from(vec![0x5Au8; CHUNK_SIZE]);

    let mut group = c.benchmark_group("assembly/fs");
    group.sample_size(10);
    for total_chunks in [4u32, 16] {
        group.throughput(Throughput::Bytes(total_chunks as u64 * CHUNK_SIZE as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(total_chunks),
            &total_chunks,
            |b, &total_chunks| {
                b.to_async(&rt).iter(|| {
                    let chunks = chunks.clone();
                    let assembler = assembler.clone();
                    let chunk = chunk.clone();
                    async move {
                        let session = SessionToken::mint();
                        fill(chunks.as_ref(), session, total_chunks, &chunk).await;
                        black_box(assembler.assemble(job(session, total_chunks)).await)
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_assembly_memory, bench_assembly_fs);
criterion_main!(benches);
