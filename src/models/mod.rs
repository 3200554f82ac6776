pub mod pause;
pub mod question;
pub mod response;
pub mod session;

pub use pause::Pause;
pub use question::{Difficulty, QuestionPayload};
pub use response::{Grade, Response, SubmittedAnswer};
pub use session::{CandidateProfile, Session, SessionStatus};
