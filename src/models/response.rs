use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

use super::{Difficulty, QuestionPayload};

/// Oracle verdict for one submitted answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub score: u32,
    pub is_correct: bool,
    pub explanation: String,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub selected: String,
    pub time_taken_seconds: u32,
    pub grade: Grade,
    /// Set when the countdown finalized the question instead of the candidate.
    pub auto_submitted: bool,
    pub answered_at: DateTime<Utc>,
}

/// One question instance within a session.
///
/// `answer` stays `None` until the question is finalized; after that the
/// record is never edited again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub session_id: String,
    pub question_number: u32,
    pub difficulty: Difficulty,
    pub time_limit_seconds: u32,
    pub question_id: String,
    pub payload: QuestionPayload,
    /// Seconds consumed as of the last checkpoint (heartbeat or pause).
    pub elapsed_seconds: u32,
    pub answer: Option<SubmittedAnswer>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Response {
    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }

    pub fn score(&self) -> Option<u32> {
        self.answer.as_ref().map(|answer| answer.grade.score)
    }

    pub fn time_taken(&self) -> Option<u32> {
        self.answer.as_ref().map(|answer| answer.time_taken_seconds)
    }

    /// Attach the final answer. A second call is a contract violation.
    pub fn record_answer(&mut self, answer: SubmittedAnswer) -> Result<(), FlowError> {
        if self.answer.is_some() {
            return Err(FlowError::Invariant(format!(
                "response {} for question {} of session {} is already answered",
                self.id, self.question_number, self.session_id
            )));
        }
        self.updated_at = answer.answered_at;
        self.elapsed_seconds = answer.time_taken_seconds;
        self.answer = Some(answer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> Response {
        let now = Utc::now();
        Response {
            id: "r1".into(),
            session_id: "s1".into(),
            question_number: 1,
            difficulty: Difficulty::Easy,
            time_limit_seconds: 20,
            question_id: "q1".into(),
            payload: QuestionPayload {
                prompt: "2 + 2?".into(),
                options: vec!["3".into(), "4".into()],
            },
            elapsed_seconds: 0,
            answer: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn answer(selected: &str) -> SubmittedAnswer {
        SubmittedAnswer {
            selected: selected.into(),
            time_taken_seconds: 7,
            grade: Grade {
                score: 10,
                is_correct: true,
                explanation: String::new(),
                feedback: "nice".into(),
            },
            auto_submitted: false,
            answered_at: Utc::now(),
        }
    }

    #[test]
    fn answer_is_recorded_once() {
        let mut response = shell();
        assert!(response.score().is_none());

        response.record_answer(answer("4")).unwrap();
        assert_eq!(response.score(), Some(10));
        assert_eq!(response.time_taken(), Some(7));

        let err = response.record_answer(answer("3")).unwrap_err();
        assert!(matches!(err, FlowError::Invariant(_)));
        assert_eq!(response.answer.as_ref().unwrap().selected, "4");
    }
}
