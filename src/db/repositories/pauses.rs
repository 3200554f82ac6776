use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, to_i64, to_u32, to_u64},
};
use crate::models::Pause;

fn row_to_pause(row: &Row) -> Result<Pause> {
    let question_number: i64 = row.get("question_number")?;
    let started_at: String = row.get("pause_started_at")?;
    let ended_at: Option<String> = row.get("pause_ended_at")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;

    Ok(Pause {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        question_number: to_u32(question_number, "question_number")?,
        pause_started_at: parse_datetime(&started_at, "pause_started_at")?,
        pause_ended_at: parse_optional_datetime(ended_at, "pause_ended_at")?,
        duration_ms: duration_ms.map(|ms| to_u64(ms, "duration_ms")).transpose()?,
    })
}

impl Database {
    pub async fn insert_pause(&self, pause: &Pause) -> Result<()> {
        let record = pause.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pauses (id, session_id, question_number, pause_started_at, pause_ended_at, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.session_id,
                    record.question_number,
                    record.pause_started_at.to_rfc3339(),
                    record.pause_ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.duration_ms.map(to_i64).transpose()?,
                ],
            )
            .with_context(|| "failed to insert pause record")?;
            Ok(())
        })
        .await
    }

    /// Closes every pause of the session that has no end yet.
    pub async fn finalize_open_pauses(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "SELECT id, pause_started_at FROM pauses
                     WHERE session_id = ?1 AND pause_ended_at IS NULL",
                )?;

                let mut rows = stmt.query(params![session_id])?;
                let mut open = Vec::new();
                while let Some(row) = rows.next()? {
                    let pause_id: String = row.get(0)?;
                    let started_at = parse_datetime(&row.get::<_, String>(1)?, "pause_started_at")?;
                    open.push((pause_id, started_at));
                }

                for (pause_id, started_at) in open {
                    let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
                    tx.execute(
                        "UPDATE pauses
                         SET pause_ended_at = ?1,
                             duration_ms = ?2
                         WHERE id = ?3",
                        params![ended_at.to_rfc3339(), to_i64(duration_ms)?, pause_id],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn list_pauses(&self, session_id: &str) -> Result<Vec<Pause>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, question_number, pause_started_at, pause_ended_at, duration_ms
                 FROM pauses
                 WHERE session_id = ?1
                 ORDER BY pause_started_at ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut pauses = Vec::new();
            while let Some(row) = rows.next()? {
                pauses.push(row_to_pause(row)?);
            }
            Ok(pauses)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateProfile, Session};

    #[tokio::test]
    async fn open_pauses_are_closed_with_duration() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
        let started = Utc::now() - chrono::Duration::seconds(30);
        db.insert_session(&Session::new(
            "s1".into(),
            "interview-1".into(),
            CandidateProfile::default(),
            started,
        ))
        .await
        .unwrap();

        db.insert_pause(&Pause {
            id: "p1".into(),
            session_id: "s1".into(),
            question_number: 2,
            pause_started_at: started,
            pause_ended_at: None,
            duration_ms: None,
        })
        .await
        .unwrap();

        db.finalize_open_pauses("s1", started + chrono::Duration::seconds(12))
            .await
            .unwrap();

        let pauses = db.list_pauses("s1").await.unwrap();
        assert_eq!(pauses.len(), 1);
        assert_eq!(pauses[0].duration_ms, Some(12_000));
        assert!(pauses[0].pause_ended_at.is_some());
    }
}
