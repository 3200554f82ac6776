//! In-memory collaborators shared by the unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::db::Database;
use crate::models::{Difficulty, QuestionPayload};
use crate::oracle::{OracleGrade, OracleQuestion, QuestionOracle};
use crate::settings::FlowSettings;

pub const CORRECT: &str = "a";

/// Deterministic oracle: question `n` of any session is `q{n}`, option "a"
/// is always right. Failures can be queued per call kind.
#[derive(Default)]
pub struct ScriptedOracle {
    pub question_calls: AtomicU32,
    pub grade_calls: AtomicU32,
    fail_questions: AtomicU32,
    fail_grades: AtomicU32,
    malformed_questions: AtomicU32,
    hold_grade: AtomicBool,
    grade_started: Notify,
    grade_released: Notify,
}

impl ScriptedOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_questions(&self, count: u32) {
        self.fail_questions.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_grades(&self, count: u32) {
        self.fail_grades.store(count, Ordering::SeqCst);
    }

    pub fn malformed_next_questions(&self, count: u32) {
        self.malformed_questions.store(count, Ordering::SeqCst);
    }

    /// The next grade call parks until [`ScriptedOracle::release_grade`].
    pub fn hold_next_grade(&self) {
        self.hold_grade.store(true, Ordering::SeqCst);
    }

    pub async fn grade_in_flight(&self) {
        self.grade_started.notified().await;
    }

    pub fn release_grade(&self) {
        self.grade_released.notify_one();
    }

    pub fn grades(&self) -> u32 {
        self.grade_calls.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QuestionOracle for ScriptedOracle {
    async fn get_question(
        &self,
        _session_id: &str,
        question_number: u32,
        difficulty: Difficulty,
    ) -> Result<OracleQuestion> {
        self.question_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.fail_questions) {
            return Err(anyhow!("oracle unavailable"));
        }
        let options = if Self::take(&self.malformed_questions) {
            Vec::new()
        } else {
            vec!["a".into(), "b".into(), "c".into(), "d".into()]
        };
        Ok(OracleQuestion {
            id: format!("q{question_number}"),
            payload: QuestionPayload {
                prompt: format!("{} question {question_number}", difficulty.as_str()),
                options,
            },
            time_limit_seconds: None,
        })
    }

    async fn grade_answer(&self, question_id: &str, selected: &str) -> Result<OracleGrade> {
        self.grade_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_grade.swap(false, Ordering::SeqCst) {
            self.grade_started.notify_one();
            self.grade_released.notified().await;
        }
        if Self::take(&self.fail_grades) {
            return Err(anyhow!("grader timed out on {question_id}"));
        }
        let is_correct = selected == CORRECT;
        Ok(OracleGrade {
            is_correct,
            score: if is_correct { 10 } else { 0 },
            explanation: String::new(),
            feedback: if is_correct { "Correct." } else { "Incorrect." }.to_string(),
        })
    }
}

pub fn test_database() -> (TempDir, Arc<Database>) {
    let dir = TempDir::new().expect("temp dir");
    let db = Database::new(dir.path().join("interview.sqlite3")).expect("database");
    (dir, Arc::new(db))
}

pub fn test_settings() -> Arc<FlowSettings> {
    Arc::new(FlowSettings {
        heartbeat_every_ticks: 5,
        ..FlowSettings::default()
    })
}
