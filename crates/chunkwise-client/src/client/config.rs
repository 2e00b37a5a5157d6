use crate::client::error::ClientError;
use crate::client::splitter::FirstChunk;
use anyhow::bail;
use chunkwise_core::chunking::DEFAULT_CHUNK_SIZE;
use chunkwise_core::{CoverImage, EntityId, EntityTarget, MediaMetadata};
use clap::Parser;
use core::time::Duration;
use std::path::{Path, PathBuf};

/// Arguments of the `chunkwise-upload` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chunkwise-upload",
    version,
    about = "Upload a large media file to a chunkwise server"
)]
pub struct CliArgs {
    /// File to upload.
    pub file: PathBuf,

    /// Base URL of the server, e.g. `http://localhost:8080`.
    ///
    /// Environment variable: `CHUNKWISE_ENDPOINT`
    #[arg(long, env = "CHUNKWISE_ENDPOINT")]
    pub endpoint: String,

    /// Bearer token forwarded in the `Authorization` header.
    ///
    /// Environment variable: `CHUNKWISE_TOKEN`
    #[arg(long, env = "CHUNKWISE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Title of the media entity.
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub date: Option<String>,

    /// Free-text description.
    #[arg(long)]
    pub content: Option<String>,

    /// Store the entity as inactive.
    #[arg(long)]
    pub inactive: bool,

    /// Cover image sent with the first chunk.
    #[arg(long)]
    pub cover: Option<PathBuf>,

    /// Replace the media of this entity instead of creating a new one.
    #[arg(long)]
    pub entity_id: Option<String>,

    /// Chunk size in bytes.
    ///
    /// Environment variable: `CHUNKWISE_CHUNK_SIZE`
    #[arg(long, env = "CHUNKWISE_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Seconds a single chunk request may take.
    ///
    /// Environment variable: `CHUNKWISE_TIMEOUT_SECS`
    #[arg(long, env = "CHUNKWISE_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub file: PathBuf,
    pub endpoint: String,
    pub token: Option<String>,
    pub target: EntityTarget,
    pub metadata: MediaMetadata,
    pub cover: Option<PathBuf>,
    pub chunk_size: u64,
    pub timeout: Duration,
}

impl UploadConfig {
    /// Builds the chunk 0 payload, reading the cover image from disk.
    pub async fn first_chunk(&self) -> Result<FirstChunk, ClientError> {
        let cover_image = match &self.cover {
            Some(path) => Some(read_cover(path).await?),
            None => None,
        };
        Ok(FirstChunk {
            target: self.target.clone(),
            metadata: self.metadata.clone(),
            cover_image,
        })
    }
}

impl TryFrom<CliArgs> for UploadConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.chunk_size == 0 {
            bail!("CHUNKWISE_CHUNK_SIZE must be greater than 0");
        }
        if args.timeout_secs == 0 {
            bail!("CHUNKWISE_TIMEOUT_SECS must be greater than 0");
        }
        let metadata = MediaMetadata {
            title: args.title,
            category: args.category,
            date: args.date,
            content: args.content,
            active: !args.inactive,
        };
        metadata.validate()?;

        Ok(Self {
            file: args.file,
            endpoint: args.endpoint,
            token: args.token.filter(|t| !t.is_empty()),
            target: args
                .entity_id
                .map_or(EntityTarget::Create, |id| EntityTarget::Update(EntityId::new(id))),
            metadata,
            cover: args.cover,
            chunk_size: args.chunk_size,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }
}

async fn read_cover(path: &Path) -> Result<CoverImage, ClientError> {
    let bytes = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .map_or_else(|| "cover".to_string(), |n| n.to_string_lossy().into_owned());
    Ok(CoverImage {
        content_type: image_content_type(path).map(str::to_string),
        filename,
        bytes: bytes.into(),
    })
}

fn image_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
