use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ErrorKind, FlowError, Result};
use crate::models::SessionStatus;

use super::controller::SessionController;
use super::events::{SessionEvent, StateSnapshot};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
    /// Show a retry affordance.
    pub retryable: bool,
}

impl From<&FlowError> for CommandError {
    fn from(err: &FlowError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Reply to every candidate intent. The snapshot is always the current
/// state, whether or not the intent went through.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub ok: bool,
    pub snapshot: StateSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

/// Translates candidate intents into controller calls.
#[derive(Clone)]
pub struct PresentationAdapter {
    controller: SessionController,
}

impl PresentationAdapter {
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.controller.subscribe()
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        self.controller.snapshot().await
    }

    pub async fn start(&self) -> CommandResult {
        let result = self.controller.begin_or_resume().await.map(|_| ());
        self.reply("start", result).await
    }

    pub async fn select_option(&self, value: &str) -> CommandResult {
        let result = self.controller.select_option(value).await.map(|_| ());
        self.reply("select_option", result).await
    }

    /// Submits the currently selected option for the question on screen.
    pub async fn submit(&self) -> CommandResult {
        let snapshot = self.controller.snapshot().await;
        let result = match (snapshot.question_number, snapshot.selected) {
            (0, _) => Err(FlowError::InvalidState("no question is active".into())),
            (_, None) => Err(FlowError::InvalidState("select an option first".into())),
            (number, Some(selected)) => self
                .controller
                .submit_answer(number, &selected)
                .await
                .map(|_| ()),
        };
        self.reply("submit", result).await
    }

    /// "Continue" on the welcome-back or paused screen.
    pub async fn resume(&self) -> CommandResult {
        let result = match self.controller.snapshot().await.status {
            SessionStatus::Paused => {
                // re-arm from the store first if this controller was just loaded
                match self.controller.begin_or_resume().await {
                    Ok(_) => self.controller.resume_from_pause().await.map(|_| ()),
                    Err(err) => Err(err),
                }
            }
            _ => self.controller.begin_or_resume().await.map(|_| ()),
        };
        self.reply("resume", result).await
    }

    pub async fn restart(&self) -> CommandResult {
        let result = match self.controller.restart().await {
            Ok(_) => self.controller.begin_or_resume().await.map(|_| ()),
            Err(err) => Err(err),
        };
        self.reply("restart", result).await
    }

    /// Repeats whatever a transient failure interrupted.
    pub async fn retry(&self) -> CommandResult {
        let snapshot = self.controller.snapshot().await;
        let result = match snapshot.status {
            SessionStatus::InProgress if snapshot.question.is_none() => {
                self.controller.advance_to_next_question().await.map(|_| ())
            }
            SessionStatus::InProgress if snapshot.timer.remaining == 0 && snapshot.timer.total > 0 => self
                .controller
                .on_timer_expire(snapshot.question_number)
                .await
                .map(|_| ()),
            _ => self.controller.begin_or_resume().await.map(|_| ()),
        };
        self.reply("retry", result).await
    }

    pub async fn visibility_changed(&self, is_foreground: bool) -> CommandResult {
        let result = self
            .controller
            .on_activity_changed(is_foreground)
            .await
            .map(|_| ());
        self.reply("visibility_changed", result).await
    }

    async fn reply(&self, command: &str, result: Result<()>) -> CommandResult {
        let snapshot = self.controller.snapshot().await;
        match result {
            Ok(()) => CommandResult {
                ok: true,
                snapshot,
                error: None,
            },
            Err(err) => {
                log_warn!("{command} failed for session {}: {err}", snapshot.session_id);
                CommandResult {
                    ok: false,
                    snapshot,
                    error: Some(CommandError::from(&err)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateProfile;
    use crate::session::SessionRecovery;
    use crate::testing::{test_database, test_settings, ScriptedOracle, CORRECT};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn adapter() -> (TempDir, Arc<ScriptedOracle>, PresentationAdapter) {
        let (dir, db) = test_database();
        let oracle = ScriptedOracle::new();
        let recovery = SessionRecovery::new(db, oracle.clone(), test_settings());
        let (controller, _) = recovery
            .enter(
                "interview-3",
                CandidateProfile {
                    name: "Linus".into(),
                    email: "linus@example.com".into(),
                    phone: None,
                },
            )
            .await
            .unwrap();
        (dir, oracle, PresentationAdapter::new(controller.with_manual_clock()))
    }

    #[tokio::test]
    async fn submit_requires_a_selection() {
        let (_dir, _oracle, adapter) = adapter().await;
        assert!(adapter.start().await.ok);

        let result = adapter.submit().await;
        assert!(!result.ok);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::InvalidState);
        assert!(!error.retryable);
        assert_eq!(result.snapshot.question_number, 1);
    }

    #[tokio::test]
    async fn select_then_submit_moves_on() {
        let (_dir, _oracle, adapter) = adapter().await;
        adapter.start().await;
        assert!(adapter.select_option(CORRECT).await.ok);

        let result = adapter.submit().await;
        assert!(result.ok);
        assert_eq!(result.snapshot.question_number, 2);
        assert_eq!(result.snapshot.total_score, 10);
        let last = result.snapshot.last_result.unwrap();
        assert!(last.is_correct);
        assert!(!last.auto_submitted);
        assert_eq!(result.snapshot.selected, None);
    }

    #[tokio::test]
    async fn oracle_outage_offers_retry() {
        let (_dir, oracle, adapter) = adapter().await;
        oracle.fail_next_questions(1);

        let result = adapter.start().await;
        assert!(!result.ok);
        assert_eq!(result.error.as_ref().map(|e| e.retryable), Some(true));
        assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Transient));

        let retried = adapter.retry().await;
        assert!(retried.ok);
        assert_eq!(retried.snapshot.question_number, 1);
    }

    #[tokio::test]
    async fn leaving_and_continuing() {
        let (_dir, _oracle, adapter) = adapter().await;
        adapter.start().await;

        let hidden = adapter.visibility_changed(false).await;
        assert_eq!(hidden.snapshot.status, SessionStatus::Paused);
        let shown = adapter.visibility_changed(true).await;
        assert_eq!(shown.snapshot.status, SessionStatus::Paused);

        let resumed = adapter.resume().await;
        assert!(resumed.ok);
        assert_eq!(resumed.snapshot.status, SessionStatus::InProgress);
    }

    #[tokio::test]
    async fn restart_hands_back_the_first_question() {
        let (_dir, _oracle, adapter) = adapter().await;
        let started = adapter.start().await;

        let restarted = adapter.restart().await;
        assert!(restarted.ok);
        assert_eq!(restarted.snapshot.status, SessionStatus::InProgress);
        assert_eq!(restarted.snapshot.question, started.snapshot.question);
    }

    #[tokio::test]
    async fn completion_carries_the_summary() {
        let (_dir, _oracle, adapter) = adapter().await;
        adapter.start().await;
        let mut last = None;
        for _ in 0..6 {
            adapter.select_option(CORRECT).await;
            last = Some(adapter.submit().await);
        }

        let last = last.unwrap();
        assert!(last.ok);
        assert_eq!(last.snapshot.status, SessionStatus::Completed);
        assert_eq!(last.snapshot.summary.map(|s| s.total_score), Some(60));
    }
}
