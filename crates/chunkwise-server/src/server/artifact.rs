//! Permanent storage for assembled artifacts.
//!
//! Artifacts are addressed by relative keys:
//!
//! - `videos/<session token>/<filename>` for the assembled video,
//! - `covers/<session token>/<filename>` for the optional cover image.
//!
//! Both embed the session token, so two sessions uploading files with the
//! same name never write to the same key. Filenames come from the client and
//! are passed through [`sanitize_filename`] first.

use crate::server::store::ChunkStream;
use async_trait::async_trait;
use bytes::Bytes;
use chunkwise_core::SessionToken;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid artifact key `{0}`")]
    InvalidKey(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Drains `stream` into the artifact at `key` and returns the number of
    /// bytes written. Readers never observe a partially written artifact,
    /// and a failed write leaves nothing behind.
    async fn write(&self, key: &str, stream: ChunkStream) -> Result<u64, ArtifactError>;

    /// Removes the artifact. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ArtifactError>;

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError>;
}

pub fn video_key(session: SessionToken, filename: &str) -> String {
    format!("videos/{session}/{}", sanitize_filename(filename))
}

pub fn cover_key(session: SessionToken, filename: &str) -> String {
    format!("covers/{session}/{}", sanitize_filename(filename))
}

/// Reduces a client supplied filename to a single safe path component.
///
/// Directory parts (with either separator) are dropped, control characters
/// removed, and names that would still be special (`""`, `.`, `..`) replaced
/// by `upload`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Artifact store on the local filesystem.
pub struct FsArtifactStore {
    root: PathBuf,
    next_temp: AtomicU64,
}

impl FsArtifactStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            next_temp: AtomicU64::new(0),
        })
    }

    /// Absolute location of the artifact stored under `key`.
    pub fn path(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(key);
        let only_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !only_normal {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, key: &str, mut stream: ChunkStream) -> Result<u64, ArtifactError> {
        let path = self.path(key)?;
        let Some(parent) = path.parent() else {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        };
        fs::create_dir_all(parent).await?;

        let n = self.next_temp.fetch_add(1, Ordering::Relaxed);
        let temp = parent.join(format!(".artifact.{n}.partial"));

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            let mut written = 0u64;
            while let Some(bytes) = stream.next().await {
                let bytes = bytes?;
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            file.sync_all().await?;
            fs::rename(&temp, &path).await?;
            Ok::<_, io::Error>(written)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp).await;
        }
        Ok(result?)
    }

    async fn delete(&self, key: &str) -> Result<(), ArtifactError> {
        match fs::remove_file(self.path(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        Ok(fs::try_exists(self.path(key)?).await?)
    }
}

/// In-memory artifact store for tests and benches.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<String, Bytes>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.artifacts.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.artifacts.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write(&self, key: &str, mut stream: ChunkStream) -> Result<u64, ArtifactError> {
        let mut buf = Vec::new();
        while let Some(bytes) = stream.next().await {
            buf.extend_from_slice(&bytes?);
        }
        let written = buf.len() as u64;
        self.artifacts.lock().insert(key.to_string(), Bytes::from(buf));
        Ok(written)
    }

    async fn delete(&self, key: &str) -> Result<(), ArtifactError> {
        self.artifacts.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        Ok(self.artifacts.lock().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(parts: &[&'static [u8]]) -> ChunkStream {
        let parts: Vec<io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        futures::stream::iter(parts).boxed()
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\clip.mov"), "clip.mov");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename("a\u{0}b.mp4"), "ab.mp4");
    }

    #[test]
    fn keys_embed_the_session_token() {
        let a = SessionToken::mint();
        let b = SessionToken::mint();
        assert_ne!(video_key(a, "same.mp4"), video_key(b, "same.mp4"));
        assert_eq!(video_key(a, "x/same.mp4"), format!("videos/{a}/same.mp4"));
        assert_eq!(cover_key(a, "c.png"), format!("covers/{a}/c.png"));
    }

    #[tokio::test]
    async fn fs_write_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let key = "videos/abc/clip.mp4";

        let written = store
            .write(key, stream_of(&[b"hello ", b"world"]))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert!(store.exists(key).await.unwrap());
        assert_eq!(
            std::fs::read(store.path(key).unwrap()).unwrap(),
            b"hello world"
        );

        store.delete(key).await.unwrap();
        store.delete(key).await.unwrap();
        assert!(!store.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn failed_fs_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let key = "videos/abc/clip.mp4";
        let broken: ChunkStream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("chunk vanished")),
        ])
        .boxed();

        assert!(store.write(key, broken).await.is_err());
        assert!(!store.exists(key).await.unwrap());
        let leftovers = std::fs::read_dir(dir.path().join("videos/abc"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn fs_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.write("../outside", stream_of(&[b"x"])).await,
            Err(ArtifactError::InvalidKey(_))
        ));
        assert!(store.path("/etc/passwd").is_err());
        assert!(store.path("").is_err());
    }
}
