//! Confined command execution for automated agents.
//!
//! Four pieces, leaves first:
//! - [`containment`]: every command and referenced path is vetted against
//!   the workspace root before anything spawns.
//! - [`exec`]: a prompt-guarded engine that streams output, detects
//!   commands stalled on interactive input, and races natural exit against
//!   the hard timeout and external cancellation.
//! - [`sessions`]: named, reusable long-running background processes with
//!   externally persisted output/control/status artifacts.
//! - [`changes`]: snapshot/diff/approve-or-revert change tracking with an
//!   append-only journal, behind the [`confirm`] collaborator seams.

pub use corral_protocol as protocol;

pub mod changes;
pub mod config;
pub mod confirm;
pub mod containment;
pub mod error;
pub mod exec;
pub mod sessions;

pub use changes::ChangeGuard;
pub use changes::ChangeJournal;
pub use config::RuntimeConfig;
pub use confirm::ConfirmationGate;
pub use confirm::ConfirmationPolicy;
pub use error::CorralErr;
pub use error::PathViolation;
pub use error::Result;
pub use exec::ExecutionEngine;
pub use sessions::SessionSupervisor;
pub use sessions::StartedSession;
