use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::models::Difficulty;

/// Per-difficulty time budgets in seconds. Easy < medium < hard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeBudgets {
    pub easy_seconds: u32,
    pub medium_seconds: u32,
    pub hard_seconds: u32,
}

impl Default for TimeBudgets {
    fn default() -> Self {
        Self {
            easy_seconds: 20,
            medium_seconds: 60,
            hard_seconds: 120,
        }
    }
}

impl TimeBudgets {
    pub fn for_difficulty(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy_seconds,
            Difficulty::Medium => self.medium_seconds,
            Difficulty::Hard => self.hard_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowSettings {
    pub total_questions: u32,
    pub per_question_max: u32,
    pub time_budgets: TimeBudgets,
    pub tick_interval_ms: u64,
    /// Persist the elapsed checkpoint every N ticks.
    pub heartbeat_every_ticks: u32,
    /// Sessions idle for longer than this are expired instead of resumed.
    pub stale_after_minutes: i64,
    pub database_file: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        let debug_mode = std::env::var("INTERVIEW_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            total_questions: 6,
            per_question_max: 10,
            time_budgets: TimeBudgets::default(),
            tick_interval_ms: 1000,
            heartbeat_every_ticks: if debug_mode { 1 } else { 10 },
            stale_after_minutes: 24 * 60,
            database_file: "interview.sqlite3".into(),
        }
    }
}

impl FlowSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_minutes)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<FlowSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                FlowSettings::default()
            })
        } else {
            FlowSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn flow(&self) -> FlowSettings {
        self.read().clone()
    }

    pub fn update_flow(&self, settings: FlowSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, FlowSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, FlowSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &FlowSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
