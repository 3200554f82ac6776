pub mod db;
pub mod error;
pub mod models;
pub mod oracle;
pub mod scoring;
pub mod session;
pub mod settings;
pub mod store;
pub mod timer;
pub mod utils;
pub mod visibility;

#[cfg(test)]
mod testing;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};

pub use db::Database;
pub use error::{ErrorKind, FlowError};
pub use models::{CandidateProfile, Session, SessionStatus};
pub use oracle::{QuestionBank, QuestionOracle};
pub use session::{
    CommandResult, PresentationAdapter, RecoveryDecision, SessionController, SessionEvent,
    SessionRecovery, StateSnapshot,
};
pub use settings::{FlowSettings, SettingsStore};
pub use store::SessionStore;

/// Process-wide wiring: settings, the SQLite store and the oracle.
pub struct AppState {
    pub db: Arc<Database>,
    pub settings: SettingsStore,
    oracle: Arc<dyn QuestionOracle>,
}

impl AppState {
    /// Opens everything under `data_dir` and expires attempts that were
    /// left open for too long while the process was down.
    pub async fn initialize(data_dir: &Path, oracle: Arc<dyn QuestionOracle>) -> anyhow::Result<Self> {
        utils::logging::init_logging();
        info!("Interview session service starting up...");

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let flow = settings.flow();
        let database = Arc::new(Database::new(data_dir.join(&flow.database_file))?);

        let state = Self {
            db: database,
            settings,
            oracle,
        };
        let expired = state.expire_stale_sessions().await?;
        if expired > 0 {
            warn!("Expired {expired} stale sessions on startup");
        }
        Ok(state)
    }

    /// Marks every open session idle past the stale threshold as expired
    /// and closes its dangling pauses. Returns how many were expired.
    pub async fn expire_stale_sessions(&self) -> anyhow::Result<usize> {
        let stale_after = self.settings.flow().stale_after();
        let now = Utc::now();
        let mut expired = 0;

        for session in self.db.list_open_sessions().await? {
            if !session.is_stale(now, stale_after) {
                continue;
            }
            warn!(
                "Session {} was left {} since {}; marking as Expired",
                session.id,
                session.status.as_str(),
                session.last_activity_at.to_rfc3339()
            );
            self.db
                .update_session(&session.id, db::SessionUpdate::status(SessionStatus::Expired))
                .await?;
            self.db.finalize_open_pauses(&session.id, now).await?;
            expired += 1;
        }
        Ok(expired)
    }

    /// Entry point for a candidate landing on `interview_id`.
    pub async fn enter(
        &self,
        interview_id: &str,
        candidate: CandidateProfile,
    ) -> Result<(PresentationAdapter, RecoveryDecision), FlowError> {
        let recovery = SessionRecovery::new(
            self.db.clone(),
            self.oracle.clone(),
            Arc::new(self.settings.flow()),
        );
        let (controller, decision) = recovery.enter(interview_id, candidate).await?;
        Ok((PresentationAdapter::new(controller), decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;
    use tempfile::TempDir;

    #[tokio::test]
    async fn startup_sweep_expires_only_stale_sessions() {
        let dir = TempDir::new().unwrap();
        let state = AppState::initialize(dir.path(), ScriptedOracle::new())
            .await
            .unwrap();

        let profile = |email: &str| CandidateProfile {
            name: "Sam".into(),
            email: email.into(),
            phone: None,
        };
        let now = Utc::now();
        let stale = Session::new("stale".into(), "i-1".into(), profile("old@example.com"), now);
        let fresh = Session::new("fresh".into(), "i-1".into(), profile("new@example.com"), now);
        state.db.insert_session(&stale).await.unwrap();
        state.db.insert_session(&fresh).await.unwrap();

        let mut update = db::SessionUpdate::status(SessionStatus::InProgress);
        update.last_activity_at = Some(now - chrono::Duration::hours(30));
        state.db.update_session("stale", update).await.unwrap();
        state
            .db
            .update_session("fresh", db::SessionUpdate::status(SessionStatus::Paused))
            .await
            .unwrap();

        assert_eq!(state.expire_stale_sessions().await.unwrap(), 1);

        let stale = state.db.get_session("stale").await.unwrap().unwrap();
        let fresh = state.db.get_session("fresh").await.unwrap().unwrap();
        assert_eq!(stale.status, SessionStatus::Expired);
        assert_eq!(fresh.status, SessionStatus::Paused);
    }

    #[tokio::test]
    async fn enter_hands_out_an_adapter() {
        let dir = TempDir::new().unwrap();
        let state = AppState::initialize(dir.path(), ScriptedOracle::new())
            .await
            .unwrap();

        let (adapter, decision) = state
            .enter(
                "i-2",
                CandidateProfile {
                    name: "Kim".into(),
                    email: "kim@example.com".into(),
                    phone: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(decision, RecoveryDecision::Fresh);
        assert_eq!(adapter.snapshot().await.status, SessionStatus::NotStarted);
    }
}
