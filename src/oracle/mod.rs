//! Question/answer oracle seam.
//!
//! The oracle mints question content and grades answers. Implementations
//! must be idempotent per `(session_id, question_number)`.

pub mod bank;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::models::{Difficulty, Grade, QuestionPayload};

pub use bank::QuestionBank;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OracleQuestion {
    pub id: String,
    pub payload: QuestionPayload,
    /// Oracle-provided budget. Falls back to the configured difficulty budget.
    pub time_limit_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OracleGrade {
    pub is_correct: bool,
    pub score: u32,
    pub explanation: String,
    pub feedback: String,
}

impl From<OracleGrade> for Grade {
    fn from(grade: OracleGrade) -> Self {
        Self {
            score: grade.score,
            is_correct: grade.is_correct,
            explanation: grade.explanation,
            feedback: grade.feedback,
        }
    }
}

#[async_trait]
pub trait QuestionOracle: Send + Sync {
    async fn get_question(
        &self,
        session_id: &str,
        question_number: u32,
        difficulty: Difficulty,
    ) -> Result<OracleQuestion>;

    async fn grade_answer(&self, question_id: &str, selected: &str) -> Result<OracleGrade>;
}

pub(crate) fn validate_question(
    question: &OracleQuestion,
    session_id: &str,
    question_number: u32,
) -> Result<(), FlowError> {
    let malformed = |reason: &str| FlowError::MalformedOracleResponse {
        session_id: session_id.to_string(),
        question_number,
        reason: reason.to_string(),
    };

    if question.id.trim().is_empty() {
        return Err(malformed("question id is empty"));
    }
    if question.payload.prompt.trim().is_empty() {
        return Err(malformed("prompt is empty"));
    }
    if question.payload.options.is_empty() {
        return Err(malformed("question has no options"));
    }
    if question.time_limit_seconds == Some(0) {
        return Err(malformed("time limit is zero"));
    }
    Ok(())
}

pub(crate) fn validate_grade(
    grade: &OracleGrade,
    per_question_max: u32,
    session_id: &str,
    question_number: u32,
) -> Result<(), FlowError> {
    if grade.score > per_question_max {
        return Err(FlowError::MalformedOracleResponse {
            session_id: session_id.to_string(),
            question_number,
            reason: format!("score {} exceeds maximum {per_question_max}", grade.score),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: Vec<&str>) -> OracleQuestion {
        OracleQuestion {
            id: "q1".into(),
            payload: QuestionPayload {
                prompt: "What does `?` do?".into(),
                options: options.into_iter().map(String::from).collect(),
            },
            time_limit_seconds: None,
        }
    }

    #[test]
    fn question_without_options_is_malformed() {
        let err = validate_question(&question(vec![]), "s1", 3).unwrap_err();
        match err {
            FlowError::MalformedOracleResponse {
                session_id,
                question_number,
                ..
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(question_number, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(validate_question(&question(vec!["propagates"]), "s1", 3).is_ok());
    }

    #[test]
    fn grade_above_maximum_is_malformed() {
        let grade = OracleGrade {
            is_correct: true,
            score: 11,
            explanation: String::new(),
            feedback: String::new(),
        };
        assert!(validate_grade(&grade, 10, "s1", 1).is_err());
        assert!(validate_grade(&OracleGrade { score: 10, ..grade }, 10, "s1", 1).is_ok());
    }
}
