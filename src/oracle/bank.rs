use std::{collections::HashMap, fs, path::Path};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::{Difficulty, QuestionPayload};

use super::{OracleGrade, OracleQuestion, QuestionOracle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankQuestion {
    pub id: String,
    pub difficulty: Difficulty,
    pub prompt: String,
    pub options: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub time_limit_seconds: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct BankFile {
    questions: Vec<BankQuestion>,
}

/// Oracle backed by a fixed set of multiple-choice questions.
///
/// Each session walks the questions of a difficulty in file order. Assigned
/// questions are remembered so that asking again for the same question
/// number hands back the same question.
pub struct QuestionBank {
    questions: Vec<BankQuestion>,
    per_question_max: u32,
    assigned: Mutex<HashMap<(String, u32), usize>>,
}

impl QuestionBank {
    pub fn new(questions: Vec<BankQuestion>, per_question_max: u32) -> Result<Self> {
        for difficulty in Difficulty::ALL {
            if !questions.iter().any(|q| q.difficulty == difficulty) {
                return Err(anyhow!("question bank has no {} questions", difficulty.as_str()));
            }
        }
        if let Some(bad) = questions.iter().find(|q| !q.options.contains(&q.answer)) {
            return Err(anyhow!("question {} lists an answer that is not an option", bad.id));
        }

        Ok(Self {
            questions,
            per_question_max,
            assigned: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_file(path: &Path, per_question_max: u32) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read question bank from {}", path.display()))?;
        let file: BankFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse question bank {}", path.display()))?;
        info!("Loaded {} questions from {}", file.questions.len(), path.display());
        Self::new(file.questions, per_question_max)
    }

    fn find(&self, question_id: &str) -> Option<&BankQuestion> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

#[async_trait]
impl QuestionOracle for QuestionBank {
    async fn get_question(
        &self,
        session_id: &str,
        question_number: u32,
        difficulty: Difficulty,
    ) -> Result<OracleQuestion> {
        let mut assigned = self.assigned.lock().await;
        let key = (session_id.to_string(), question_number);

        let index = match assigned.get(&key) {
            Some(index) => *index,
            None => {
                let already_used = assigned
                    .iter()
                    .filter(|((sid, _), idx)| {
                        sid == session_id && self.questions[**idx].difficulty == difficulty
                    })
                    .count();
                let pool: Vec<usize> = self
                    .questions
                    .iter()
                    .enumerate()
                    .filter(|(_, q)| q.difficulty == difficulty)
                    .map(|(idx, _)| idx)
                    .collect();
                let index = pool[already_used % pool.len()];
                assigned.insert(key, index);
                index
            }
        };

        let question = &self.questions[index];
        Ok(OracleQuestion {
            id: question.id.clone(),
            payload: QuestionPayload {
                prompt: question.prompt.clone(),
                options: question.options.clone(),
            },
            time_limit_seconds: question.time_limit_seconds,
        })
    }

    async fn grade_answer(&self, question_id: &str, selected: &str) -> Result<OracleGrade> {
        let question = self
            .find(question_id)
            .ok_or_else(|| anyhow!("unknown question {question_id}"))?;
        let is_correct = question.answer == selected;

        Ok(OracleGrade {
            is_correct,
            score: if is_correct { self.per_question_max } else { 0 },
            explanation: question.explanation.clone(),
            feedback: if is_correct {
                "Correct.".to_string()
            } else {
                format!("Incorrect. The expected answer was \"{}\".", question.answer)
            },
        })
    }
}
