use anyhow::Context;
use chunkwise_client::client::{
    config::{CliArgs, UploadConfig},
    splitter::ChunkSplitter,
    transport::HttpTransport,
    upload::Uploader,
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = UploadConfig::try_from(args)?;
    init_logging()?;

    let transport = HttpTransport::new(&config.endpoint, config.token.as_deref(), config.timeout)?;
    let first_chunk = config
        .first_chunk()
        .await
        .context("failed to read the cover image")?;
    let mut splitter = ChunkSplitter::open(&config.file, config.chunk_size, first_chunk)
        .await
        .with_context(|| format!("failed to open {}", config.file.display()))?;

    tracing::info!(
        "Uploading {} ({} bytes, {} chunks) to {}",
        splitter.filename(),
        splitter.size(),
        splitter.total_chunks(),
        transport.endpoint()
    );

    let entity = Uploader::new(transport)
        .upload(&mut splitter, |progress| {
            tracing::info!(
                "{}/{} chunks acknowledged ({:.1}%)",
                progress.acknowledged,
                progress.total_chunks,
                progress.percent
            );
        })
        .await
        .context("upload failed")?;

    println!("{}", serde_json::to_string_pretty(&entity)?);
    Ok(())
}

/// Logs go to stderr so stdout carries only the resulting entity.
fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_writer(std::io::stderr),
        )
        .try_init()?;
    Ok(())
}
