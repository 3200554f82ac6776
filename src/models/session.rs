use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Expired,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::NotStarted
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "NotStarted",
            SessionStatus::InProgress => "InProgress",
            SessionStatus::Paused => "Paused",
            SessionStatus::Completed => "Completed",
            SessionStatus::Expired => "Expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }

    /// Whether the status machine permits moving from `self` to `next`.
    ///
    /// Only `Paused <-> InProgress` goes backwards. `InProgress -> NotStarted`
    /// is the restart path and is checked by the caller.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::{Completed, Expired, InProgress, NotStarted, Paused};
        match (*self, next) {
            (NotStarted, InProgress) => true,
            (InProgress, Paused) | (Paused, InProgress) => true,
            (InProgress | Paused, Completed) => true,
            (NotStarted | InProgress | Paused, Expired) => true,
            (a, b) => a == b,
        }
    }
}

/// Candidate details supplied by the document extractor. Read-only here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub interview_id: String,
    pub status: SessionStatus,
    pub current_question_index: u32,
    pub total_score: u32,
    pub candidate: CandidateProfile,
    pub switch_count: u32,
    pub last_switch_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, interview_id: String, candidate: CandidateProfile, now: DateTime<Utc>) -> Self {
        Self {
            id,
            interview_id,
            status: SessionStatus::NotStarted,
            current_question_index: 0,
            total_score: 0,
            candidate,
            switch_count: 0,
            last_switch_at: None,
            restart_count: 0,
            started_at: None,
            completed_at: None,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the candidate has been away longer than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        now - self.last_activity_at > stale_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_backwards_between_paused_and_in_progress() {
        use SessionStatus::*;
        assert!(NotStarted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Paused));
        assert!(Paused.can_transition_to(InProgress));
        assert!(Paused.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Expired.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(NotStarted));
        assert!(!NotStarted.can_transition_to(Completed));
    }

    #[test]
    fn stale_check_uses_last_activity() {
        let now = Utc::now();
        let mut session = Session::new("s".into(), "i".into(), CandidateProfile::default(), now);
        assert!(!session.is_stale(now, chrono::Duration::minutes(10)));
        session.last_activity_at = now - chrono::Duration::minutes(11);
        assert!(session.is_stale(now, chrono::Duration::minutes(10)));
    }
}
