use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }

    /// Fixed ordering: questions 1-2 easy, 3-4 medium, 5-6 hard.
    pub fn for_question(question_number: u32) -> Difficulty {
        match question_number {
            0..=2 => Difficulty::Easy,
            3..=4 => Difficulty::Medium,
            _ => Difficulty::Hard,
        }
    }
}

/// Prompt and choices as handed out by the oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub prompt: String,
    pub options: Vec<String>,
}

impl QuestionPayload {
    /// Answer recorded when the clock runs out before anything was chosen.
    pub fn default_answer(&self) -> Option<&str> {
        self.options.first().map(String::as_str)
    }
}
