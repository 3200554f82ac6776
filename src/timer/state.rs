use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    Idle,
    Running,
    Expired,
}

impl Default for TimerStatus {
    fn default() -> Self {
        TimerStatus::Idle
    }
}

/// Result of delivering one tick to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing armed, already expired, or paused.
    Ignored,
    Ticked { remaining: u32 },
    /// Reached zero on this tick. Reported once per `start`.
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub question_number: u32,
    pub remaining: u32,
    pub total: u32,
    pub is_paused: bool,
}

/// Whole-second countdown for the active question.
#[derive(Debug, Clone, Default)]
pub struct QuestionTimer {
    status: TimerStatus,
    question_number: u32,
    total: u32,
    remaining: u32,
    is_paused: bool,
}

impl QuestionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a fresh countdown, replacing whatever was running.
    pub fn start(&mut self, question_number: u32, limit_seconds: u32) {
        self.start_at(question_number, limit_seconds, limit_seconds);
    }

    /// Arms a countdown that already consumed part of its budget.
    pub fn start_at(&mut self, question_number: u32, limit_seconds: u32, remaining: u32) {
        let remaining = remaining.min(limit_seconds);
        *self = Self {
            status: if remaining == 0 {
                TimerStatus::Expired
            } else {
                TimerStatus::Running
            },
            question_number,
            total: limit_seconds,
            remaining,
            is_paused: false,
        };
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.status != TimerStatus::Running || self.is_paused {
            return TickOutcome::Ignored;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.status = TimerStatus::Expired;
            TickOutcome::Expired
        } else {
            TickOutcome::Ticked {
                remaining: self.remaining,
            }
        }
    }

    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    /// Drops the countdown entirely (question finalized or session over).
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_armed(&self) -> bool {
        self.status != TimerStatus::Idle
    }

    pub fn is_armed_for(&self, question_number: u32) -> bool {
        self.is_armed() && self.question_number == question_number
    }

    pub fn is_expired(&self) -> bool {
        self.status == TimerStatus::Expired
    }

    pub fn is_expired_for(&self, question_number: u32) -> bool {
        self.is_expired() && self.question_number == question_number
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Seconds spent so far, always within `[0, total]`.
    pub fn time_taken(&self) -> u32 {
        self.total.saturating_sub(self.remaining).min(self.total)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            question_number: self.question_number,
            remaining: self.remaining,
            total: self.total,
            is_paused: self.is_paused,
        }
    }
}
