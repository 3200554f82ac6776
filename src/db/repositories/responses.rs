use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_difficulty, parse_optional_datetime, to_u32},
};
use crate::models::{Grade, QuestionPayload, Response, SubmittedAnswer};

const RESPONSE_COLUMNS: &str = "id, session_id, question_number, difficulty, time_limit_seconds,
     question_id, prompt, options_json, elapsed_seconds, selected_answer, time_taken_seconds,
     score, is_correct, explanation, feedback, auto_submitted, answered_at, created_at, updated_at";

fn row_to_response(row: &Row) -> Result<Response> {
    let question_number: i64 = row.get("question_number")?;
    let difficulty: String = row.get("difficulty")?;
    let time_limit: i64 = row.get("time_limit_seconds")?;
    let options_json: String = row.get("options_json")?;
    let elapsed: i64 = row.get("elapsed_seconds")?;
    let selected: Option<String> = row.get("selected_answer")?;
    let answered_at: Option<String> = row.get("answered_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let options: Vec<String> =
        serde_json::from_str(&options_json).context("failed to parse options_json")?;

    let answer = match (selected, parse_optional_datetime(answered_at, "answered_at")?) {
        (Some(selected), Some(answered_at)) => {
            let time_taken: i64 = row.get("time_taken_seconds")?;
            let score: i64 = row.get("score")?;
            Some(SubmittedAnswer {
                selected,
                time_taken_seconds: to_u32(time_taken, "time_taken_seconds")?,
                grade: Grade {
                    score: to_u32(score, "score")?,
                    is_correct: row.get("is_correct")?,
                    explanation: row.get::<_, Option<String>>("explanation")?.unwrap_or_default(),
                    feedback: row.get::<_, Option<String>>("feedback")?.unwrap_or_default(),
                },
                auto_submitted: row.get("auto_submitted")?,
                answered_at,
            })
        }
        _ => None,
    };

    Ok(Response {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        question_number: to_u32(question_number, "question_number")?,
        difficulty: parse_difficulty(&difficulty)?,
        time_limit_seconds: to_u32(time_limit, "time_limit_seconds")?,
        question_id: row.get("question_id")?,
        payload: QuestionPayload {
            prompt: row.get("prompt")?,
            options,
        },
        elapsed_seconds: to_u32(elapsed, "elapsed_seconds")?,
        answer,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_response(&self, response: &Response) -> Result<()> {
        let record = response.clone();
        let options_json = serde_json::to_string(&record.payload.options)?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO responses (id, session_id, question_number, difficulty, time_limit_seconds,
                     question_id, prompt, options_json, elapsed_seconds, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.session_id,
                    record.question_number,
                    record.difficulty.as_str(),
                    record.time_limit_seconds,
                    record.question_id,
                    record.payload.prompt,
                    options_json,
                    record.elapsed_seconds,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| {
                format!(
                    "failed to insert response for question {} of session {}",
                    record.question_number, record.session_id
                )
            })?;
            Ok(())
        })
        .await
    }

    pub async fn get_response(
        &self,
        session_id: &str,
        question_number: u32,
    ) -> Result<Option<Response>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESPONSE_COLUMNS} FROM responses
                 WHERE session_id = ?1 AND question_number = ?2"
            ))?;

            let mut rows = stmt.query(params![session_id, question_number])?;
            let response = match rows.next()? {
                Some(row) => Some(row_to_response(row)?),
                None => None,
            };
            Ok(response)
        })
        .await
    }

    pub async fn list_responses(&self, session_id: &str) -> Result<Vec<Response>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESPONSE_COLUMNS} FROM responses
                 WHERE session_id = ?1
                 ORDER BY question_number ASC"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let mut responses = Vec::new();
            while let Some(row) = rows.next()? {
                responses.push(row_to_response(row)?);
            }
            Ok(responses)
        })
        .await
    }

    /// Stores the seconds consumed so far on an unanswered question.
    pub async fn checkpoint_response(&self, response_id: &str, elapsed_seconds: u32) -> Result<()> {
        let response_id = response_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE responses
                 SET elapsed_seconds = ?1,
                     updated_at = ?2
                 WHERE id = ?3 AND selected_answer IS NULL",
                params![elapsed_seconds, Utc::now().to_rfc3339(), response_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Writes the answer unless one is already stored. Returns whether the
    /// row was written.
    pub async fn record_answer(&self, response_id: &str, answer: &SubmittedAnswer) -> Result<bool> {
        let response_id = response_id.to_string();
        let answer = answer.clone();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE responses
                 SET selected_answer = ?1,
                     time_taken_seconds = ?2,
                     elapsed_seconds = ?2,
                     score = ?3,
                     is_correct = ?4,
                     explanation = ?5,
                     feedback = ?6,
                     auto_submitted = ?7,
                     answered_at = ?8,
                     updated_at = ?8
                 WHERE id = ?9 AND selected_answer IS NULL",
                params![
                    answer.selected,
                    answer.time_taken_seconds,
                    answer.grade.score,
                    answer.grade.is_correct,
                    answer.grade.explanation,
                    answer.grade.feedback,
                    answer.auto_submitted,
                    answer.answered_at.to_rfc3339(),
                    response_id,
                ],
            )?;
            Ok(rows_affected == 1)
        })
        .await
    }
}
