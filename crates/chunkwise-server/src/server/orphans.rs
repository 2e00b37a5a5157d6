//! Ledger of artifacts that were written but never attached to an entity.
//!
//! When the owning-entity save fails after assembly, the artifact is kept
//! rather than deleted and recorded here for manual reconciliation.

use crate::server::entity::unix_millis;
use chunkwise_core::SessionToken;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanRecord {
    pub artifact_key: String,
    pub session_token: SessionToken,
    pub reason: String,
    /// Milliseconds since the Unix epoch.
    pub recorded_at: u64,
}

#[derive(Default)]
pub struct OrphanLedger {
    records: Mutex<Vec<OrphanRecord>>,
}

impl OrphanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, artifact_key: String, session_token: SessionToken, reason: String) {
        tracing::warn!(
            artifact_key = %artifact_key,
            session = %session_token,
            reason = %reason,
            "artifact left without an owning entity"
        );
        self.records.lock().push(OrphanRecord {
            artifact_key,
            session_token,
            reason,
            recorded_at: unix_millis(),
        });
    }

    pub fn list(&self) -> Vec<OrphanRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
