pub mod state;
pub mod ticker;

pub use state::{QuestionTimer, TickOutcome, TimerSnapshot, TimerStatus};
pub use ticker::Ticker;
