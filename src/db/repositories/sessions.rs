use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_status, to_u32},
};
use crate::models::{CandidateProfile, Session, SessionStatus};

const SESSION_COLUMNS: &str = "id, interview_id, status, current_question_index, total_score,
     candidate_name, candidate_email, candidate_phone, switch_count, last_switch_at,
     restart_count, started_at, completed_at, last_activity_at, created_at, updated_at";

/// Partial update of a session row. `None` leaves the column untouched;
/// `updated_at` is always stamped by the store.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub current_question_index: Option<u32>,
    pub total_score: Option<u32>,
    pub switch_count: Option<u32>,
    pub last_switch_at: Option<DateTime<Utc>>,
    pub restart_count: Option<u32>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn assignments(&self) -> Vec<(&'static str, Value)> {
        let mut columns = Vec::new();
        if let Some(status) = self.status {
            columns.push(("status", Value::Text(status.as_str().into())));
        }
        if let Some(index) = self.current_question_index {
            columns.push(("current_question_index", Value::Integer(index.into())));
        }
        if let Some(score) = self.total_score {
            columns.push(("total_score", Value::Integer(score.into())));
        }
        if let Some(count) = self.switch_count {
            columns.push(("switch_count", Value::Integer(count.into())));
        }
        if let Some(at) = self.last_switch_at {
            columns.push(("last_switch_at", Value::Text(at.to_rfc3339())));
        }
        if let Some(count) = self.restart_count {
            columns.push(("restart_count", Value::Integer(count.into())));
        }
        if let Some(started_at) = self.started_at {
            let value = match started_at {
                Some(at) => Value::Text(at.to_rfc3339()),
                None => Value::Null,
            };
            columns.push(("started_at", value));
        }
        if let Some(at) = self.completed_at {
            columns.push(("completed_at", Value::Text(at.to_rfc3339())));
        }
        if let Some(at) = self.last_activity_at {
            columns.push(("last_activity_at", Value::Text(at.to_rfc3339())));
        }
        columns
    }
}

fn row_to_session(row: &Row) -> Result<Session> {
    let status: String = row.get("status")?;
    let index: i64 = row.get("current_question_index")?;
    let total_score: i64 = row.get("total_score")?;
    let switch_count: i64 = row.get("switch_count")?;
    let restart_count: i64 = row.get("restart_count")?;
    let last_switch_at: Option<String> = row.get("last_switch_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let last_activity_at: String = row.get("last_activity_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Session {
        id: row.get("id")?,
        interview_id: row.get("interview_id")?,
        status: parse_status(&status)?,
        current_question_index: to_u32(index, "current_question_index")?,
        total_score: to_u32(total_score, "total_score")?,
        candidate: CandidateProfile {
            name: row.get("candidate_name")?,
            email: row.get("candidate_email")?,
            phone: row.get("candidate_phone")?,
        },
        switch_count: to_u32(switch_count, "switch_count")?,
        last_switch_at: parse_optional_datetime(last_switch_at, "last_switch_at")?,
        restart_count: to_u32(restart_count, "restart_count")?,
        started_at: parse_optional_datetime(started_at, "started_at")?,
        completed_at: parse_optional_datetime(completed_at, "completed_at")?,
        last_activity_at: parse_datetime(&last_activity_at, "last_activity_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, interview_id, status, current_question_index, total_score,
                     candidate_name, candidate_email, candidate_phone, switch_count, last_switch_at,
                     restart_count, started_at, completed_at, last_activity_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    record.id,
                    record.interview_id,
                    record.status.as_str(),
                    record.current_question_index,
                    record.total_score,
                    record.candidate.name,
                    record.candidate.email,
                    record.candidate.phone,
                    record.switch_count,
                    record.last_switch_at.map(|dt| dt.to_rfc3339()),
                    record.restart_count,
                    record.started_at.map(|dt| dt.to_rfc3339()),
                    record.completed_at.map(|dt| dt.to_rfc3339()),
                    record.last_activity_at.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    /// Most recent attempt of `interview_id` by the candidate with `email`.
    pub async fn find_latest_session(
        &self,
        interview_id: &str,
        email: &str,
    ) -> Result<Option<Session>> {
        let interview_id = interview_id.to_string();
        let email = email.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE interview_id = ?1 AND candidate_email = ?2
                 ORDER BY created_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![interview_id, email])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    /// Sessions that were still live when the process went away.
    pub async fn list_open_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status IN ('InProgress', 'Paused')
                 ORDER BY last_activity_at DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Applies the non-empty fields of `update` and returns the new `updated_at`.
    pub async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<DateTime<Utc>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let updated_at = Utc::now();
            let mut assignments = update.assignments();
            assignments.push(("updated_at", Value::Text(updated_at.to_rfc3339())));

            let set_clause = assignments
                .iter()
                .enumerate()
                .map(|(idx, (column, _))| format!("{column} = ?{}", idx + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE sessions SET {set_clause} WHERE id = ?{}",
                assignments.len() + 1
            );

            let mut values: Vec<Value> = assignments.into_iter().map(|(_, v)| v).collect();
            values.push(Value::Text(session_id.clone()));

            let rows_affected = conn.execute(&sql, params_from_iter(values))?;
            if rows_affected == 0 {
                return Err(anyhow!("Session {session_id} not found"));
            }
            Ok(updated_at)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, email: &str, created_at: DateTime<Utc>) -> Session {
        Session::new(
            id.into(),
            "interview-1".into(),
            CandidateProfile {
                name: "Ada".into(),
                email: email.into(),
                phone: None,
            },
            created_at,
        )
    }

    #[tokio::test]
    async fn partial_update_only_touches_given_columns() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
        let session = sample("s1", "ada@example.com", Utc::now());
        db.insert_session(&session).await.unwrap();

        db.update_session(
            "s1",
            SessionUpdate {
                status: Some(SessionStatus::InProgress),
                current_question_index: Some(2),
                ..SessionUpdate::default()
            },
        )
        .await
        .unwrap();

        let stored = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::InProgress);
        assert_eq!(stored.current_question_index, 2);
        assert_eq!(stored.total_score, 0);
        assert_eq!(stored.candidate.email, "ada@example.com");
        assert!(stored.updated_at >= session.updated_at);
    }

    #[tokio::test]
    async fn update_of_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
        let result = db
            .update_session("missing", SessionUpdate::status(SessionStatus::Paused))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn latest_session_per_candidate_and_open_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
        let now = Utc::now();
        db.insert_session(&sample("old", "ada@example.com", now - chrono::Duration::hours(2)))
            .await
            .unwrap();
        db.insert_session(&sample("new", "ada@example.com", now)).await.unwrap();
        db.insert_session(&sample("other", "bob@example.com", now)).await.unwrap();

        let latest = db
            .find_latest_session("interview-1", "ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, "new");

        db.update_session("other", SessionUpdate::status(SessionStatus::Paused))
            .await
            .unwrap();
        let open = db.list_open_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "other");
    }
}
