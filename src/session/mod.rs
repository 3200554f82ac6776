//! Candidate session flow: controller, recovery on re-entry, and the
//! intent-level surface used by the presentation layer.

mod commands;
mod controller;
mod events;
mod recovery;

pub use commands::{CommandError, CommandResult, PresentationAdapter};
pub use controller::{SessionController, SubmitOutcome};
pub use events::{LastResult, QuestionView, SessionEvent, StateSnapshot};
pub use recovery::{RecoveryDecision, SessionRecovery};
