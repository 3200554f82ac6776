use serde::Serialize;

use crate::models::{Difficulty, Response, SessionStatus};
use crate::scoring::ScoreSummary;
use crate::timer::TimerSnapshot;
use crate::visibility::ActivitySignal;

/// Question as shown to the candidate. Never carries grading data.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub question_number: u32,
    pub difficulty: Difficulty,
    pub prompt: String,
    pub options: Vec<String>,
    pub time_limit_seconds: u32,
}

impl From<&Response> for QuestionView {
    fn from(response: &Response) -> Self {
        Self {
            question_number: response.question_number,
            difficulty: response.difficulty,
            prompt: response.payload.prompt.clone(),
            options: response.payload.options.clone(),
            time_limit_seconds: response.time_limit_seconds,
        }
    }
}

/// Outcome of the most recently finalized question.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastResult {
    pub question_number: u32,
    pub selected: String,
    pub score: u32,
    pub is_correct: bool,
    pub feedback: String,
    pub explanation: String,
    pub time_taken_seconds: u32,
    /// Drives the "time's up" acknowledgment.
    pub auto_submitted: bool,
}

impl LastResult {
    pub fn from_response(response: &Response) -> Option<Self> {
        let answer = response.answer.as_ref()?;
        Some(Self {
            question_number: response.question_number,
            selected: answer.selected.clone(),
            score: answer.grade.score,
            is_correct: answer.grade.is_correct,
            feedback: answer.grade.feedback.clone(),
            explanation: answer.grade.explanation.clone(),
            time_taken_seconds: answer.time_taken_seconds,
            auto_submitted: answer.auto_submitted,
        })
    }
}

/// Read-only view of the session handed to the presentation layer after
/// every transition.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    /// Number of the question on screen, 0 when none is active.
    pub question_number: u32,
    pub answered_count: u32,
    pub total_questions: u32,
    pub total_score: u32,
    pub timer: TimerSnapshot,
    pub question: Option<QuestionView>,
    pub selected: Option<String>,
    pub last_result: Option<LastResult>,
    pub activity: ActivitySignal,
    pub summary: Option<ScoreSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged(StateSnapshot),
    #[serde(rename_all = "camelCase")]
    TimerTick {
        session_id: String,
        question_number: u32,
        remaining: u32,
        total: u32,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        session_id: String,
        question_number: u32,
        elapsed_seconds: u32,
    },
    #[serde(rename_all = "camelCase")]
    TimeUp {
        session_id: String,
        question_number: u32,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        session_id: String,
        summary: ScoreSummary,
    },
}
