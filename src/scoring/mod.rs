//! Final result computation over graded responses.

use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::models::{Difficulty, Response};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyBreakdown {
    pub difficulty: Difficulty,
    /// Responses that earned the full per-question score.
    pub correct: u32,
    pub score: u32,
    pub max_score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    pub total_score: u32,
    pub max_score: u32,
    pub percentage: u32,
    pub correct_count: u32,
    pub auto_submitted_count: u32,
    pub average_time_taken: u32,
    pub breakdown: Vec<DifficultyBreakdown>,
}

impl ScoreSummary {
    pub fn bucket(&self, difficulty: Difficulty) -> Option<&DifficultyBreakdown> {
        self.breakdown.iter().find(|b| b.difficulty == difficulty)
    }
}

/// Sum of the scores recorded so far. Safe to call mid-session.
pub fn running_total(responses: &[Response]) -> u32 {
    responses.iter().filter_map(Response::score).sum()
}

/// Aggregates a finished session.
///
/// Every one of the `total_questions` responses must be graded; anything
/// less is a caller bug and reported as an invariant violation.
pub fn aggregate(
    responses: &[Response],
    total_questions: u32,
    per_question_max: u32,
) -> Result<ScoreSummary, FlowError> {
    let answered: Vec<_> = responses
        .iter()
        .filter_map(|response| response.answer.as_ref().map(|answer| (response, answer)))
        .collect();

    if answered.len() as u32 != total_questions || responses.len() as u32 != total_questions {
        return Err(FlowError::Invariant(format!(
            "score aggregation needs {total_questions} graded responses, got {} of {}",
            answered.len(),
            responses.len()
        )));
    }

    let total_score: u32 = answered.iter().map(|(_, a)| a.grade.score).sum();
    let max_score = total_questions * per_question_max;
    let is_full_marks = |score: u32| per_question_max > 0 && score == per_question_max;

    let breakdown = Difficulty::ALL
        .iter()
        .map(|&difficulty| {
            let bucket: Vec<_> = answered
                .iter()
                .filter(|(r, _)| r.difficulty == difficulty)
                .collect();
            let bucket_size = (1..=total_questions)
                .filter(|&n| Difficulty::for_question(n) == difficulty)
                .count() as u32;
            DifficultyBreakdown {
                difficulty,
                correct: bucket.iter().filter(|(_, a)| is_full_marks(a.grade.score)).count() as u32,
                score: bucket.iter().map(|(_, a)| a.grade.score).sum(),
                max_score: bucket_size * per_question_max,
            }
        })
        .collect();

    let total_time: u32 = answered.iter().map(|(_, a)| a.time_taken_seconds).sum();

    Ok(ScoreSummary {
        total_score,
        max_score,
        percentage: rounded_ratio(100 * total_score, max_score),
        correct_count: answered.iter().filter(|(_, a)| is_full_marks(a.grade.score)).count() as u32,
        auto_submitted_count: answered.iter().filter(|(_, a)| a.auto_submitted).count() as u32,
        average_time_taken: rounded_ratio(total_time, answered.len() as u32),
        breakdown,
    })
}

/// `round(numerator / denominator)` with halves rounding up; 0 for an empty denominator.
fn rounded_ratio(numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return 0;
    }
    ((numerator as f64) / (denominator as f64)).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, QuestionPayload, SubmittedAnswer};
    use chrono::Utc;

    fn graded(question_number: u32, score: u32, time_taken: u32) -> Response {
        let now = Utc::now();
        Response {
            id: format!("r{question_number}"),
            session_id: "s1".into(),
            question_number,
            difficulty: Difficulty::for_question(question_number),
            time_limit_seconds: 60,
            question_id: format!("q{question_number}"),
            payload: QuestionPayload {
                prompt: "p".into(),
                options: vec!["a".into()],
            },
            elapsed_seconds: time_taken,
            answer: Some(SubmittedAnswer {
                selected: "a".into(),
                time_taken_seconds: time_taken,
                grade: Grade {
                    score,
                    is_correct: score == 10,
                    explanation: String::new(),
                    feedback: String::new(),
                },
                auto_submitted: time_taken == 60,
                answered_at: now,
            }),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn mixed_results_aggregate_per_bucket() {
        let responses: Vec<_> = [10, 10, 0, 10, 0, 10]
            .into_iter()
            .enumerate()
            .map(|(idx, score)| graded(idx as u32 + 1, score, 10 + idx as u32))
            .collect();

        let summary = aggregate(&responses, 6, 10).unwrap();
        assert_eq!(summary.total_score, 40);
        assert_eq!(summary.max_score, 60);
        assert_eq!(summary.percentage, 67);
        assert_eq!(summary.correct_count, 4);

        let easy = summary.bucket(Difficulty::Easy).unwrap();
        assert_eq!((easy.correct, easy.score, easy.max_score), (2, 20, 20));
        let medium = summary.bucket(Difficulty::Medium).unwrap();
        assert_eq!((medium.correct, medium.score), (1, 10));
        let hard = summary.bucket(Difficulty::Hard).unwrap();
        assert_eq!((hard.correct, hard.score), (1, 10));

        // times 10..=15, mean 12.5
        assert_eq!(summary.average_time_taken, 13);
    }

    #[test]
    fn partial_scores_are_not_counted_as_correct() {
        let mut responses: Vec<_> = (1..=6).map(|n| graded(n, 10, 60)).collect();
        responses[4] = graded(5, 7, 60);

        let summary = aggregate(&responses, 6, 10).unwrap();
        assert_eq!(summary.total_score, 57);
        assert_eq!(summary.percentage, 95);
        assert_eq!(summary.bucket(Difficulty::Hard).unwrap().correct, 1);
        assert_eq!(summary.auto_submitted_count, 6);
    }

    #[test]
    fn aggregating_early_is_an_invariant_violation() {
        let mut responses: Vec<_> = (1..=6).map(|n| graded(n, 10, 5)).collect();
        responses[5].answer = None;
        assert!(matches!(
            aggregate(&responses, 6, 10),
            Err(FlowError::Invariant(_))
        ));
        assert!(matches!(
            aggregate(&responses[..5], 6, 10),
            Err(FlowError::Invariant(_))
        ));
        assert_eq!(running_total(&responses), 50);
    }
}
