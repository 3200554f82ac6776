//! Durable store seam.
//!
//! The controller only talks to [`SessionStore`]; [`Database`] is the
//! SQLite-backed implementation shipped with the crate.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{Database, SessionUpdate};
use crate::models::{Pause, Response, Session, SubmittedAnswer};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn find_latest_session(
        &self,
        interview_id: &str,
        candidate_email: &str,
    ) -> Result<Option<Session>>;

    async fn list_open_sessions(&self) -> Result<Vec<Session>>;

    /// Partial update; returns the store-assigned `updated_at`.
    async fn update_session(&self, session_id: &str, update: SessionUpdate)
        -> Result<DateTime<Utc>>;

    async fn create_response(&self, response: &Response) -> Result<()>;

    async fn get_response(&self, session_id: &str, question_number: u32)
        -> Result<Option<Response>>;

    async fn list_responses(&self, session_id: &str) -> Result<Vec<Response>>;

    async fn checkpoint_response(&self, response_id: &str, elapsed_seconds: u32) -> Result<()>;

    /// Returns `false` when the response already carried an answer.
    async fn record_answer(&self, response_id: &str, answer: &SubmittedAnswer) -> Result<bool>;

    async fn open_pause(&self, pause: &Pause) -> Result<()>;

    async fn close_open_pauses(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<()>;

    async fn list_pauses(&self, session_id: &str) -> Result<Vec<Pause>>;
}

#[async_trait]
impl SessionStore for Database {
    async fn create_session(&self, session: &Session) -> Result<()> {
        self.insert_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Database::get_session(self, session_id).await
    }

    async fn find_latest_session(
        &self,
        interview_id: &str,
        candidate_email: &str,
    ) -> Result<Option<Session>> {
        Database::find_latest_session(self, interview_id, candidate_email).await
    }

    async fn list_open_sessions(&self) -> Result<Vec<Session>> {
        Database::list_open_sessions(self).await
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<DateTime<Utc>> {
        Database::update_session(self, session_id, update).await
    }

    async fn create_response(&self, response: &Response) -> Result<()> {
        self.insert_response(response).await
    }

    async fn get_response(
        &self,
        session_id: &str,
        question_number: u32,
    ) -> Result<Option<Response>> {
        Database::get_response(self, session_id, question_number).await
    }

    async fn list_responses(&self, session_id: &str) -> Result<Vec<Response>> {
        Database::list_responses(self, session_id).await
    }

    async fn checkpoint_response(&self, response_id: &str, elapsed_seconds: u32) -> Result<()> {
        Database::checkpoint_response(self, response_id, elapsed_seconds).await
    }

    async fn record_answer(&self, response_id: &str, answer: &SubmittedAnswer) -> Result<bool> {
        Database::record_answer(self, response_id, answer).await
    }

    async fn open_pause(&self, pause: &Pause) -> Result<()> {
        self.insert_pause(pause).await
    }

    async fn close_open_pauses(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        self.finalize_open_pauses(session_id, ended_at).await
    }

    async fn list_pauses(&self, session_id: &str) -> Result<Vec<Pause>> {
        Database::list_pauses(self, session_id).await
    }
}
