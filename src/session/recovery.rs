use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{FlowError, Result},
    models::{CandidateProfile, Session, SessionStatus},
    oracle::QuestionOracle,
    scoring::ScoreSummary,
    settings::FlowSettings,
    store::SessionStore,
};

use super::controller::SessionController;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// What the candidate sees when landing on the interview.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecoveryDecision {
    /// Nothing to recover; show the start screen.
    Fresh,
    /// An attempt is open. Resuming is the default action.
    #[serde(rename_all = "camelCase")]
    WelcomeBack {
        status: SessionStatus,
        answered: u32,
        total: u32,
        can_restart: bool,
    },
    ShowResults { summary: ScoreSummary },
    Expired,
}

/// Decides how a returning candidate re-enters their attempt.
pub struct SessionRecovery {
    store: Arc<dyn SessionStore>,
    oracle: Arc<dyn QuestionOracle>,
    settings: Arc<FlowSettings>,
}

impl SessionRecovery {
    pub fn new(
        store: Arc<dyn SessionStore>,
        oracle: Arc<dyn QuestionOracle>,
        settings: Arc<FlowSettings>,
    ) -> Self {
        Self {
            store,
            oracle,
            settings,
        }
    }

    /// Looks up the candidate's latest attempt for `interview_id`, creating
    /// one if there is none, and returns its controller with the decision.
    pub async fn enter(
        &self,
        interview_id: &str,
        candidate: CandidateProfile,
    ) -> Result<(SessionController, RecoveryDecision)> {
        let now = Utc::now();
        let existing = self
            .store
            .find_latest_session(interview_id, &candidate.email)
            .await
            .map_err(FlowError::store)?;

        let session = match existing {
            Some(session) => session,
            None => {
                let session = Session::new(
                    Uuid::new_v4().to_string(),
                    interview_id.to_string(),
                    candidate,
                    now,
                );
                self.store
                    .create_session(&session)
                    .await
                    .map_err(FlowError::store)?;
                log_info!("Created session {} for interview {interview_id}", session.id);
                let controller = self.controller_for(&session.id).await?;
                return Ok((controller, RecoveryDecision::Fresh));
            }
        };

        let controller = self.controller_for(&session.id).await?;
        let stale = !session.status.is_terminal() && session.is_stale(now, self.settings.stale_after());

        let decision = match session.status {
            SessionStatus::Expired => RecoveryDecision::Expired,
            _ if stale => {
                log_warn!(
                    "Session {} idle since {}, expiring",
                    session.id,
                    session.last_activity_at.to_rfc3339()
                );
                controller.expire().await?;
                RecoveryDecision::Expired
            }
            SessionStatus::Completed => RecoveryDecision::ShowResults {
                summary: controller.summary().await?,
            },
            SessionStatus::NotStarted => RecoveryDecision::Fresh,
            SessionStatus::InProgress | SessionStatus::Paused => {
                let answered = controller.session().await.current_question_index;
                RecoveryDecision::WelcomeBack {
                    status: session.status,
                    answered,
                    total: self.settings.total_questions,
                    can_restart: answered == 0,
                }
            }
        };

        Ok((controller, decision))
    }

    async fn controller_for(&self, session_id: &str) -> Result<SessionController> {
        SessionController::load(
            session_id,
            self.store.clone(),
            self.oracle.clone(),
            self.settings.clone(),
        )
        .await
    }
}
