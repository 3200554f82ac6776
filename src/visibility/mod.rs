//! Foreground/background tracking of the surface the candidate works in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SessionStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySignal {
    pub is_foreground: bool,
    pub switch_count: u32,
    pub last_switch_at: Option<DateTime<Utc>>,
}

impl Default for ActivitySignal {
    fn default() -> Self {
        Self {
            is_foreground: true,
            switch_count: 0,
            last_switch_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityChange {
    /// Candidate left an in-progress question; the session must pause.
    PauseRequired,
    /// Recorded, but no transition follows. Returning to the foreground
    /// always lands here since resuming is an explicit action.
    Noted,
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityMonitor {
    signal: ActivitySignal,
}

impl VisibilityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores counters persisted with the session.
    pub fn with_history(switch_count: u32, last_switch_at: Option<DateTime<Utc>>) -> Self {
        Self {
            signal: ActivitySignal {
                is_foreground: true,
                switch_count,
                last_switch_at,
            },
        }
    }

    pub fn on_activity_changed(
        &mut self,
        is_foreground: bool,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> ActivityChange {
        let was_foreground = self.signal.is_foreground;
        self.signal.is_foreground = is_foreground;

        if is_foreground || status != SessionStatus::InProgress {
            return ActivityChange::Noted;
        }

        // blur + visibilitychange for one switch arrive back to back
        if was_foreground {
            self.signal.switch_count += 1;
            self.signal.last_switch_at = Some(now);
        }
        ActivityChange::PauseRequired
    }

    pub fn signal(&self) -> ActivitySignal {
        self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaving_an_active_session_counts_and_pauses() {
        let mut monitor = VisibilityMonitor::new();
        let now = Utc::now();

        let change = monitor.on_activity_changed(false, SessionStatus::InProgress, now);
        assert_eq!(change, ActivityChange::PauseRequired);
        assert_eq!(monitor.signal().switch_count, 1);
        assert_eq!(monitor.signal().last_switch_at, Some(now));
        assert!(!monitor.signal().is_foreground);
    }

    #[test]
    fn background_outside_in_progress_is_not_counted() {
        let mut monitor = VisibilityMonitor::new();
        for status in [
            SessionStatus::NotStarted,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Expired,
        ] {
            let change = monitor.on_activity_changed(false, status, Utc::now());
            assert_eq!(change, ActivityChange::Noted);
            monitor.on_activity_changed(true, status, Utc::now());
        }
        assert_eq!(monitor.signal().switch_count, 0);
    }

    #[test]
    fn returning_never_resumes_and_duplicates_count_once() {
        let mut monitor = VisibilityMonitor::with_history(2, None);
        let now = Utc::now();

        monitor.on_activity_changed(false, SessionStatus::InProgress, now);
        monitor.on_activity_changed(false, SessionStatus::InProgress, now);
        assert_eq!(monitor.signal().switch_count, 3);

        let change = monitor.on_activity_changed(true, SessionStatus::Paused, now);
        assert_eq!(change, ActivityChange::Noted);
        assert!(monitor.signal().is_foreground);
    }
}
