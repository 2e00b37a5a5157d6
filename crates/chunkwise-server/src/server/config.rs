use crate::server::coordinator::CoordinatorLimits;
use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Slack added to the request body limit for multipart framing and the
/// small text fields.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Runtime configuration for the `chunkwise-server` binary.
///
/// Every value can be given as a CLI argument or an environment variable
/// (including through a `.env` file). The defaults suit a single-node
/// deployment with local disk storage.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chunkwise-server",
    version,
    about = "An HTTP service for resumable, chunked media uploads"
)]
pub struct CliArgs {
    /// Address the HTTP server listens on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Root directory for staged chunks (`<dir>/chunks`) and finished
    /// artifacts (`<dir>/artifacts`).
    ///
    /// Environment variable: `DATA_DIR`
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Largest accepted chunk payload, in bytes.
    ///
    /// Clients choose their own chunk size; anything above this limit is
    /// rejected as an invalid request before it is stored.
    ///
    /// Environment variable: `MAX_CHUNK_BYTES`
    #[arg(long, env = "MAX_CHUNK_BYTES", default_value_t = 8 * 1024 * 1024)]
    pub max_chunk_bytes: usize,

    /// Largest accepted cover image, in bytes.
    ///
    /// Environment variable: `MAX_COVER_BYTES`
    #[arg(long, env = "MAX_COVER_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_cover_bytes: usize,

    /// Largest `total_chunks` a session may declare.
    ///
    /// Together with `MAX_CHUNK_BYTES` this bounds the size of a single
    /// artifact.
    ///
    /// Environment variable: `MAX_TOTAL_CHUNKS`
    #[arg(long, env = "MAX_TOTAL_CHUNKS", default_value_t = 65_536)]
    pub max_total_chunks: u32,

    /// Seconds of inactivity after which an upload session is purged.
    ///
    /// Environment variable: `SESSION_TIMEOUT_SECS`
    #[arg(long, env = "SESSION_TIMEOUT_SECS", default_value_t = 1800)]
    pub session_timeout_secs: u64,

    /// Seconds between two expiry sweeps.
    ///
    /// Environment variable: `SWEEP_INTERVAL_SECS`
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Seconds a single chunk write may take before it is reported as a
    /// storage failure.
    ///
    /// Environment variable: `CHUNK_WRITE_TIMEOUT_SECS`
    #[arg(long, env = "CHUNK_WRITE_TIMEOUT_SECS", default_value_t = 30)]
    pub chunk_write_timeout_secs: u64,

    /// Seconds to wait for background tasks to stop on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub data_dir: PathBuf,
    pub limits: CoordinatorLimits,
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn chunk_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    /// Largest request body the HTTP layer accepts.
    pub fn body_limit(&self) -> usize {
        self.limits
            .max_chunk_bytes
            .saturating_add(self.limits.max_cover_bytes)
            .saturating_add(FORM_OVERHEAD_BYTES)
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_chunk_bytes == 0 {
            bail!("MAX_CHUNK_BYTES must be greater than 0");
        }
        if args.max_total_chunks == 0 {
            bail!("MAX_TOTAL_CHUNKS must be greater than 0");
        }
        if args.session_timeout_secs == 0 {
            bail!("SESSION_TIMEOUT_SECS must be greater than 0");
        }
        if args.sweep_interval_secs == 0 {
            bail!("SWEEP_INTERVAL_SECS must be greater than 0");
        }
        if args.chunk_write_timeout_secs == 0 {
            bail!("CHUNK_WRITE_TIMEOUT_SECS must be greater than 0");
        }
        if args.sweep_interval_secs > args.session_timeout_secs {
            bail!(
                "SWEEP_INTERVAL_SECS ({}) must not exceed SESSION_TIMEOUT_SECS ({})",
                args.sweep_interval_secs,
                args.session_timeout_secs
            );
        }

        Ok(Self {
            server_addr: args.server_addr,
            data_dir: args.data_dir,
            limits: CoordinatorLimits {
                max_chunk_bytes: args.max_chunk_bytes,
                max_cover_bytes: args.max_cover_bytes,
                max_total_chunks: args.max_total_chunks,
                chunk_write_timeout: Duration::from_secs(args.chunk_write_timeout_secs),
            },
            session_timeout: Duration::from_secs(args.session_timeout_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
