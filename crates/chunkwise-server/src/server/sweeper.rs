//! Background expiry of idle upload sessions.
//!
//! Every `interval` the sweeper removes sessions whose last activity is
//! older than the inactivity window. Incomplete sessions are expired and
//! their chunks purged; finished sessions are simply forgotten. Sessions in
//! the middle of assembly are left alone.

use crate::server::registry::SessionRegistry;
use crate::server::store::ChunkStore;
use crate::server::telemetry::{decrement_sessions_inflight, increment_sessions_expired};
use core::time::Duration;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Incomplete sessions whose chunks were purged.
    pub expired: usize,
    /// Finished sessions dropped from the registry.
    pub retired: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    registry: Arc<SessionRegistry>,
    chunks: Arc<dyn ChunkStore>,
    session_timeout: Duration,
}

impl Sweeper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        chunks: Arc<dyn ChunkStore>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            chunks,
            session_timeout,
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let Some(cutoff) = Instant::now().checked_sub(self.session_timeout) else {
            return SweepReport::default();
        };

        let mut report = SweepReport::default();
        for removed in self.registry.remove_idle(cutoff) {
            if !removed.expired {
                report.retired += 1;
                continue;
            }
            report.expired += 1;
            decrement_sessions_inflight();
            if let Err(e) = self.chunks.purge(removed.token).await {
                tracing::warn!(session = %removed.token, error = %e, "failed to purge expired chunks");
            }
            tracing::info!(session = %removed.token, "upload session expired");
        }

        if report.expired > 0 {
            increment_sessions_expired(report.expired as u64);
        }
        report
    }

    /// Sweeps on a fixed interval until `shutdown` is cancelled.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(?interval, timeout = ?self.session_timeout, "session sweeper started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    if report != SweepReport::default() {
                        tracing::debug!(expired = report.expired, retired = report.retired, "sweep finished");
                    }
                }
            }
        }

        tracing::info!("session sweeper stopped");
    }
}
