//! Wire-facing types for the corral execution core.
//!
//! Everything here crosses the tool-invocation boundary, so every type is
//! serde-serializable and carries no behavior beyond small constructors and
//! display helpers. The execution engine, session supervisor, and change
//! workflow in `corral-core` produce and consume these.

mod changes;
mod confirmation;
mod exec;
mod sessions;

pub use changes::ChangeEntry;
pub use changes::ChangeStrategy;
pub use changes::ConfirmationOutcome;
pub use changes::FileState;
pub use changes::GuardedOutcome;
pub use confirmation::ConfirmationDecision;
pub use confirmation::ConfirmationRequest;
pub use confirmation::ConfirmationStatus;
pub use exec::CommandRequest;
pub use exec::ExecutionResult;
pub use exec::PromptKind;
pub use exec::PromptSignature;
pub use sessions::ControlPayload;
pub use sessions::ControlRecord;
pub use sessions::SessionState;
pub use sessions::SessionSummary;
pub use sessions::system_time_to_unix_millis;
