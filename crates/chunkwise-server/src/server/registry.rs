//! In-memory bookkeeping for upload sessions.
//!
//! The registry maps a [`SessionToken`] to a shared [`SessionHandle`]. The
//! map itself sits behind a short-lived lock that is never held across an
//! `.await`; everything per-session lives in the handle:
//!
//! - the mutable [`UploadSession`] record, behind a synchronous mutex;
//! - an async assembly lock that serializes the `assembling -> complete |
//!   failed` transition, so a session is assembled at most once even when
//!   its final chunk is delivered concurrently.

use chunkwise_core::{CoverImage, EntityTarget, Error, MediaEntity, MediaMetadata, SessionToken};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Assembling,
    Complete(MediaEntity),
    Failed(Error),
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete(_) | SessionStatus::Failed(_) | SessionStatus::Expired
        )
    }
}

/// What chunk 0 fixes for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub total_chunks: u32,
    pub filename: String,
    pub target: EntityTarget,
    pub metadata: MediaMetadata,
    pub cover_image: Option<CoverImage>,
}

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub token: SessionToken,
    pub total_chunks: u32,
    /// Byte length of every received index. The key set is the set of
    /// received indices.
    pub chunk_lengths: BTreeMap<u32, u64>,
    pub filename: String,
    pub target: EntityTarget,
    pub metadata: MediaMetadata,
    pub cover_image: Option<CoverImage>,
    pub status: SessionStatus,
    pub created_at: Instant,
    pub last_activity_at: Instant,
}

impl UploadSession {
    pub fn received_count(&self) -> u32 {
        self.chunk_lengths.len() as u32
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunk_lengths.values().sum()
    }

    /// Records chunk `index` and refreshes the activity timestamp.
    ///
    /// Only pending sessions accept chunks; the current status is returned
    /// otherwise.
    pub fn record_chunk(&mut self, index: u32, length: u64) -> Result<u32, SessionStatus> {
        if self.status != SessionStatus::Pending {
            return Err(self.status.clone());
        }
        self.chunk_lengths.insert(index, length);
        self.last_activity_at = Instant::now();
        Ok(self.received_count())
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }
}

pub struct SessionHandle {
    token: SessionToken,
    state: Mutex<UploadSession>,
    assembly: tokio::sync::Mutex<()>,
}

impl SessionHandle {
    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn state(&self) -> MutexGuard<'_, UploadSession> {
        self.state.lock()
    }

    pub fn snapshot(&self) -> UploadSession {
        self.state.lock().clone()
    }

    /// Lock guarding the terminal transition of this session.
    pub fn assembly_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.assembly
    }
}

/// Number of live sessions in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub pending: usize,
    pub assembling: usize,
    pub complete: usize,
    pub failed: usize,
}

/// A session removed by [`SessionRegistry::remove_idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSession {
    pub token: SessionToken,
    /// Whether the session was still collecting chunks, i.e. it expired
    /// rather than aged out after finishing.
    pub expired: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionToken, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session under a freshly minted token.
    pub fn create(&self, new: NewSession) -> Arc<SessionHandle> {
        let token = SessionToken::mint();
        let now = Instant::now();
        let handle = Arc::new(SessionHandle {
            token,
            state: Mutex::new(UploadSession {
                token,
                total_chunks: new.total_chunks,
                chunk_lengths: BTreeMap::new(),
                filename: new.filename,
                target: new.target,
                metadata: new.metadata,
                cover_image: new.cover_image,
                status: SessionStatus::Pending,
                created_at: now,
                last_activity_at: now,
            }),
            assembly: tokio::sync::Mutex::new(()),
        });
        self.sessions.lock().insert(token, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, token: &SessionToken) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().get(token).cloned()
    }

    pub fn remove(&self, token: &SessionToken) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().remove(token)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn counts(&self) -> SessionCounts {
        let sessions = self.sessions.lock();
        let mut counts = SessionCounts::default();
        for handle in sessions.values() {
            match handle.state().status {
                SessionStatus::Pending => counts.pending += 1,
                SessionStatus::Assembling => counts.assembling += 1,
                SessionStatus::Complete(_) => counts.complete += 1,
                SessionStatus::Failed(_) => counts.failed += 1,
                SessionStatus::Expired => {}
            }
        }
        counts
    }

    /// Removes every session idle since before `cutoff`, except sessions
    /// being assembled. Pending sessions are marked expired on the way out so
    /// a request still holding the handle cannot record further chunks.
    pub fn remove_idle(&self, cutoff: Instant) -> Vec<RemovedSession> {
        let mut sessions = self.sessions.lock();
        let mut removed = Vec::new();
        sessions.retain(|token, handle| {
            let mut state = handle.state();
            if state.last_activity_at >= cutoff || state.status == SessionStatus::Assembling {
                return true;
            }
            let expired = state.status == SessionStatus::Pending;
            if expired {
                state.status = SessionStatus::Expired;
            }
            removed.push(RemovedSession {
                token: *token,
                expired,
            });
            false
        });
        removed
    }
}
