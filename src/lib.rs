//! Durastream - Streaming session management with layered error recovery.
//!
//! Two halves, usable together or apart:
//!
//! - [`session`] turns a raw stream of provider chunks into managed
//!   per-conversation sessions with buffering, pause/resume, watchdog
//!   timeouts, and tool-call assembly.
//! - [`recovery`] classifies failures, trips per-operation circuit
//!   breakers, and coordinates retry, fallback, and degradation.
//!
//! Wire a [`session::SessionManager`] to a [`recovery::RecoveryCoordinator`]
//! with [`session::SessionManager::with_recovery`] and stream errors flow
//! through classification and circuit breaking automatically.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod chunk;
pub mod config;

// ============================================================================
// Domain
// ============================================================================

pub mod recovery;
pub mod session;
