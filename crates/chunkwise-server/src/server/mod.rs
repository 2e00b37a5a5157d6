//! Server-side components of the chunked upload service.
//!
//! ## Submodules
//!
//! - [`coordinator`] - Validates chunk submissions, drives the session state
//!   machine and triggers assembly.
//! - [`registry`] - In-memory session bookkeeping with per-session locks.
//! - [`store`] - Temporary chunk storage (filesystem and in-memory).
//! - [`artifact`] - Permanent storage for assembled artifacts.
//! - [`assembler`] - Concatenates a complete chunk set and hands it to the
//!   owning entity.
//! - [`entity`] - The owning-entity collaborator.
//! - [`orphans`] - Ledger of artifacts left unreferenced by a failed save.
//! - [`sweeper`] - Background expiry of idle sessions.
//! - [`http`] - The axum router.
//! - [`config`] - CLI and environment configuration.
//! - [`telemetry`] - Logging, tracing and metrics initialization.

pub mod artifact;
pub mod assembler;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod http;
pub mod orphans;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod telemetry;
