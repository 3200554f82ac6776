use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::{
    db::SessionUpdate,
    error::{FlowError, Result},
    models::{Difficulty, Pause, Response, Session, SessionStatus, SubmittedAnswer},
    oracle::{validate_grade, validate_question, QuestionOracle},
    scoring::{aggregate, running_total, ScoreSummary},
    settings::FlowSettings,
    store::SessionStore,
    timer::{QuestionTimer, TickOutcome, Ticker},
    visibility::{ActivityChange, VisibilityMonitor},
};

use super::events::{LastResult, QuestionView, SessionEvent, StateSnapshot};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const EVENT_CAPACITY: usize = 64;

/// Who finalized a question.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Finalize {
    Candidate(String),
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Recorded {
        question_number: u32,
        auto_submitted: bool,
    },
    /// The question was already finalized by the competing trigger.
    AlreadyFinalized { question_number: u32 },
}

struct ControllerState {
    session: Session,
    responses: Vec<Response>,
    timer: QuestionTimer,
    visibility: VisibilityMonitor,
    selected: Option<String>,
    last_result: Option<LastResult>,
    summary: Option<ScoreSummary>,
    ticks_since_heartbeat: u32,
}

impl ControllerState {
    fn new(session: Session, responses: Vec<Response>) -> Self {
        let visibility = VisibilityMonitor::with_history(session.switch_count, session.last_switch_at);
        let last_result = responses
            .iter()
            .rev()
            .find_map(LastResult::from_response);
        Self {
            session,
            responses,
            timer: QuestionTimer::new(),
            visibility,
            selected: None,
            last_result,
            summary: None,
            ticks_since_heartbeat: 0,
        }
    }

    fn answered_count(&self) -> u32 {
        self.responses.iter().filter(|r| r.is_answered()).count() as u32
    }

    fn active_response(&self) -> Option<&Response> {
        let next = self.session.current_question_index + 1;
        self.responses
            .iter()
            .find(|r| r.question_number == next && !r.is_answered())
    }

    fn upsert_response(&mut self, response: Response) {
        match self
            .responses
            .iter_mut()
            .find(|r| r.question_number == response.question_number)
        {
            Some(slot) => *slot = response,
            None => {
                self.responses.push(response);
                self.responses.sort_by_key(|r| r.question_number);
            }
        }
    }

    /// Arms the countdown for the active question from persisted progress.
    ///
    /// A session that was `InProgress` when it went away keeps losing time
    /// while away; a `Paused` one does not.
    fn rearm(&mut self, now: DateTime<Utc>) -> bool {
        let status = self.session.status;
        let Some(response) = self.active_response() else {
            return false;
        };
        let question_number = response.question_number;
        let limit = response.time_limit_seconds;

        let mut consumed = response.elapsed_seconds;
        if status == SessionStatus::InProgress {
            let away = (now - self.session.last_activity_at).num_seconds().max(0);
            consumed = consumed.saturating_add(u32::try_from(away).unwrap_or(u32::MAX));
        }

        self.timer
            .start_at(question_number, limit, limit.saturating_sub(consumed));
        if status == SessionStatus::Paused {
            self.timer.pause();
        }
        self.ticks_since_heartbeat = 0;
        true
    }

    fn snapshot(&self, total_questions: u32) -> StateSnapshot {
        let active = self.active_response();
        StateSnapshot {
            session_id: self.session.id.clone(),
            status: self.session.status,
            question_number: active.map(|r| r.question_number).unwrap_or(0),
            answered_count: self.answered_count(),
            total_questions,
            total_score: self.session.total_score,
            timer: self.timer.snapshot(),
            question: active.map(QuestionView::from),
            selected: self.selected.clone(),
            last_result: self.last_result.clone(),
            activity: self.visibility.signal(),
            summary: self.summary.clone(),
        }
    }
}

/// State machine for one candidate attempt.
///
/// Cloning yields another handle to the same attempt. Transitions that
/// talk to the oracle are serialized through `gate`; pausing and ticking
/// only take the short `state` lock so they are never held up by an
/// in-flight oracle call.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<ControllerState>>,
    gate: Arc<Mutex<()>>,
    store: Arc<dyn SessionStore>,
    oracle: Arc<dyn QuestionOracle>,
    settings: Arc<FlowSettings>,
    events: broadcast::Sender<SessionEvent>,
    ticker: Arc<Mutex<Ticker>>,
    drive_clock: bool,
}

impl SessionController {
    pub fn new(
        session: Session,
        responses: Vec<Response>,
        store: Arc<dyn SessionStore>,
        oracle: Arc<dyn QuestionOracle>,
        settings: Arc<FlowSettings>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ControllerState::new(session, responses))),
            gate: Arc::new(Mutex::new(())),
            store,
            oracle,
            settings,
            events,
            ticker: Arc::new(Mutex::new(Ticker::new())),
            drive_clock: true,
        }
    }

    /// Builds a controller from what the store holds for `session_id`.
    pub async fn load(
        session_id: &str,
        store: Arc<dyn SessionStore>,
        oracle: Arc<dyn QuestionOracle>,
        settings: Arc<FlowSettings>,
    ) -> Result<Self> {
        let session = store
            .get_session(session_id)
            .await
            .map_err(FlowError::store)?
            .ok_or_else(|| FlowError::NotFound(session_id.to_string()))?;
        let responses = store
            .list_responses(session_id)
            .await
            .map_err(FlowError::store)?;
        Ok(Self::new(session, responses, store, oracle, settings))
    }

    /// Ticks are delivered by the caller through [`SessionController::tick`]
    /// instead of a background task.
    pub fn with_manual_clock(mut self) -> Self {
        self.drive_clock = false;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        self.state.lock().await.snapshot(self.settings.total_questions)
    }

    pub async fn session(&self) -> Session {
        self.state.lock().await.session.clone()
    }

    pub async fn responses(&self) -> Vec<Response> {
        self.state.lock().await.responses.clone()
    }

    /// Enters the flow: starts a fresh session or picks up where a
    /// persisted one left off. Calling it again without intervening events
    /// changes nothing.
    pub async fn begin_or_resume(&self) -> Result<StateSnapshot> {
        let _gate = self.gate.lock().await;
        self.reconcile().await?;

        let now = Utc::now();
        let status = self.state.lock().await.session.status;
        match status {
            SessionStatus::Expired => {
                let session_id = self.state.lock().await.session.id.clone();
                return Err(FlowError::SessionExpired(session_id));
            }
            SessionStatus::Completed => {
                self.ensure_summary().await?;
            }
            SessionStatus::NotStarted => {
                let (session_id, restart_count) = {
                    let state = self.state.lock().await;
                    (state.session.id.clone(), state.session.restart_count)
                };
                self.persist(
                    &session_id,
                    SessionUpdate {
                        status: Some(SessionStatus::InProgress),
                        current_question_index: Some(0),
                        started_at: Some(Some(now)),
                        last_activity_at: Some(now),
                        ..SessionUpdate::default()
                    },
                )
                .await?;
                {
                    let mut state = self.state.lock().await;
                    state.session.status = SessionStatus::InProgress;
                    state.session.current_question_index = 0;
                    state.session.started_at = Some(now);
                    state.session.last_activity_at = now;
                }
                log_info!("Session {session_id} started (restarts so far: {restart_count})");
                self.advance_locked().await?;
            }
            SessionStatus::InProgress | SessionStatus::Paused => {
                let pending_expiry = {
                    let mut state = self.state.lock().await;
                    let active = state.active_response().map(|r| r.question_number);
                    match active {
                        Some(number) if state.timer.is_armed_for(number) => None,
                        Some(number) => {
                            state.rearm(now);
                            log_info!(
                                "Session {} re-armed question {number} with {}s left",
                                state.session.id,
                                state.timer.remaining()
                            );
                            (state.timer.is_expired() && status == SessionStatus::InProgress)
                                .then_some(number)
                        }
                        None => None,
                    }
                };

                let needs_question = {
                    let state = self.state.lock().await;
                    state.active_response().is_none() && status == SessionStatus::InProgress
                };

                if let Some(number) = pending_expiry {
                    self.finalize_locked(number, Finalize::Timeout).await?;
                } else if needs_question {
                    self.advance_locked().await?;
                }
            }
        }

        self.ensure_clock().await;
        Ok(self.emit_state().await)
    }

    /// Creates the next question, or completes the session once every
    /// question is answered. Safe to retry after a failure.
    pub async fn advance_to_next_question(&self) -> Result<StateSnapshot> {
        let _gate = self.gate.lock().await;
        let status = self.state.lock().await.session.status;
        if !matches!(status, SessionStatus::InProgress | SessionStatus::Paused) {
            return Err(FlowError::InvalidState(format!(
                "cannot advance a session that is {}",
                status.as_str()
            )));
        }
        if self.state.lock().await.active_response().is_none() {
            self.advance_locked().await?;
        }
        Ok(self.emit_state().await)
    }

    /// Marks `value` as the candidate's current choice for the active question.
    pub async fn select_option(&self, value: &str) -> Result<StateSnapshot> {
        let mut state = self.state.lock().await;
        if state.session.status != SessionStatus::InProgress {
            return Err(FlowError::InvalidState(format!(
                "cannot select an option while the session is {}",
                state.session.status.as_str()
            )));
        }
        let Some(active) = state.active_response() else {
            return Err(FlowError::InvalidState("no question is active".into()));
        };
        if !active.payload.options.iter().any(|option| option == value) {
            return Err(FlowError::InvalidState(format!(
                "\"{value}\" is not an option of question {}",
                active.question_number
            )));
        }
        if state.timer.is_expired() {
            return Err(FlowError::InvalidState("time is up for this question".into()));
        }

        state.selected = Some(value.to_string());
        let snapshot = state.snapshot(self.settings.total_questions);
        drop(state);

        let _ = self.events.send(SessionEvent::StateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Candidate-initiated submission for `question_number`.
    pub async fn submit_answer(&self, question_number: u32, selected: &str) -> Result<SubmitOutcome> {
        let _gate = self.gate.lock().await;
        let outcome = self
            .finalize_locked(question_number, Finalize::Candidate(selected.to_string()))
            .await?;
        self.emit_state().await;
        Ok(outcome)
    }

    /// Countdown for `question_number` reached zero.
    pub async fn on_timer_expire(&self, question_number: u32) -> Result<SubmitOutcome> {
        let _gate = self.gate.lock().await;
        let outcome = self
            .finalize_locked(question_number, Finalize::Timeout)
            .await?;
        self.emit_state().await;
        Ok(outcome)
    }

    /// Foreground/background change of the candidate's surface.
    ///
    /// Going to the background while a question runs pauses the session and
    /// persists the pause right away. Coming back never resumes.
    pub async fn on_activity_changed(&self, is_foreground: bool) -> Result<StateSnapshot> {
        let now = Utc::now();
        let pause = {
            let mut state = self.state.lock().await;
            let status = state.session.status;
            match state.visibility.on_activity_changed(is_foreground, status, now) {
                ActivityChange::Noted => None,
                ActivityChange::PauseRequired => {
                    // a freshly loaded controller has not armed the countdown yet
                    let unarmed = state
                        .active_response()
                        .map(|r| r.question_number)
                        .filter(|number| !state.timer.is_armed_for(*number));
                    if unarmed.is_some() {
                        state.rearm(now);
                    }
                    state.session.status = SessionStatus::Paused;
                    state.timer.pause();
                    let signal = state.visibility.signal();
                    state.session.switch_count = signal.switch_count;
                    state.session.last_switch_at = signal.last_switch_at;
                    state.session.last_activity_at = now;
                    let active = state
                        .active_response()
                        .map(|r| (r.id.clone(), r.question_number));
                    let elapsed = state.timer.time_taken();
                    if let Some((response_id, number)) = &active {
                        if state.timer.is_armed_for(*number) {
                            if let Some(response) =
                                state.responses.iter_mut().find(|r| &r.id == response_id)
                            {
                                response.elapsed_seconds = elapsed;
                            }
                        }
                    }
                    Some((state.session.id.clone(), signal, active, elapsed))
                }
            }
        };

        if let Some((session_id, signal, active, elapsed)) = pause {
            log_warn!(
                "Session {session_id} paused: candidate left (switch #{})",
                signal.switch_count
            );
            self.persist(
                &session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Paused),
                    switch_count: Some(signal.switch_count),
                    last_switch_at: signal.last_switch_at,
                    last_activity_at: Some(now),
                    ..SessionUpdate::default()
                },
            )
            .await?;

            let question_number = active.as_ref().map(|(_, n)| *n).unwrap_or(0);
            if let Some((response_id, _)) = &active {
                self.store
                    .checkpoint_response(response_id, elapsed)
                    .await
                    .map_err(FlowError::store)?;
            }
            self.store
                .open_pause(&Pause {
                    id: Uuid::new_v4().to_string(),
                    session_id: session_id.clone(),
                    question_number,
                    pause_started_at: now,
                    pause_ended_at: None,
                    duration_ms: None,
                })
                .await
                .map_err(FlowError::store)?;
        }

        Ok(self.emit_state().await)
    }

    /// Explicit "continue" from the candidate after a pause.
    pub async fn resume_from_pause(&self) -> Result<StateSnapshot> {
        let _gate = self.gate.lock().await;
        let now = Utc::now();

        let session_id = {
            let state = self.state.lock().await;
            match state.session.status {
                SessionStatus::Paused => state.session.id.clone(),
                SessionStatus::InProgress => {
                    return Ok(state.snapshot(self.settings.total_questions));
                }
                other => {
                    return Err(FlowError::InvalidState(format!(
                        "cannot resume a session that is {}",
                        other.as_str()
                    )));
                }
            }
        };

        self.persist(
            &session_id,
            SessionUpdate {
                status: Some(SessionStatus::InProgress),
                last_activity_at: Some(now),
                ..SessionUpdate::default()
            },
        )
        .await?;
        self.store
            .close_open_pauses(&session_id, now)
            .await
            .map_err(FlowError::store)?;

        let (pending_expiry, needs_question) = {
            let mut state = self.state.lock().await;
            state.session.status = SessionStatus::InProgress;
            state.session.last_activity_at = now;
            let active = state.active_response().map(|r| r.question_number);
            if let Some(number) = active {
                if !state.timer.is_armed_for(number) {
                    // pause time does not count against the budget
                    state.session.status = SessionStatus::Paused;
                    state.rearm(now);
                    state.session.status = SessionStatus::InProgress;
                }
                state.timer.resume();
            }
            (
                active.filter(|_| state.timer.is_expired()),
                active.is_none(),
            )
        };
        log_info!("Session {session_id} resumed by candidate");

        if let Some(number) = pending_expiry {
            self.finalize_locked(number, Finalize::Timeout).await?;
        } else if needs_question {
            self.advance_locked().await?;
        }

        self.ensure_clock().await;
        Ok(self.emit_state().await)
    }

    /// Delivers one clock tick. Returns `false` once the session can no
    /// longer tick (completed or expired).
    pub async fn tick(&self) -> bool {
        enum Action {
            Nothing,
            Expire(u32),
            Heartbeat {
                response_id: String,
                question_number: u32,
                elapsed: u32,
            },
        }

        let now = Utc::now();
        let (action, tick_event) = {
            let mut state = self.state.lock().await;
            if state.session.status.is_terminal() {
                return false;
            }
            if state.session.status != SessionStatus::InProgress {
                return true;
            }

            let active = state
                .active_response()
                .map(|r| (r.id.clone(), r.question_number));
            let Some((response_id, question_number)) = active else {
                return true;
            };

            match state.timer.tick() {
                TickOutcome::Expired => (Action::Expire(question_number), None),
                TickOutcome::Ticked { remaining } => {
                    let event = SessionEvent::TimerTick {
                        session_id: state.session.id.clone(),
                        question_number,
                        remaining,
                        total: state.timer.total(),
                    };
                    state.ticks_since_heartbeat += 1;
                    if state.ticks_since_heartbeat >= self.settings.heartbeat_every_ticks.max(1) {
                        state.ticks_since_heartbeat = 0;
                        let elapsed = state.timer.time_taken();
                        state.session.last_activity_at = now;
                        if let Some(response) =
                            state.responses.iter_mut().find(|r| r.id == response_id)
                        {
                            response.elapsed_seconds = elapsed;
                        }
                        (
                            Action::Heartbeat {
                                response_id,
                                question_number,
                                elapsed,
                            },
                            Some(event),
                        )
                    } else {
                        (Action::Nothing, Some(event))
                    }
                }
                // an earlier expiry whose auto-submit did not go through
                TickOutcome::Ignored if state.timer.is_expired_for(question_number) => {
                    (Action::Expire(question_number), None)
                }
                TickOutcome::Ignored => (Action::Nothing, None),
            }
        };

        if let Some(event) = tick_event {
            let _ = self.events.send(event);
        }

        match action {
            Action::Nothing => {}
            Action::Heartbeat {
                response_id,
                question_number,
                elapsed,
            } => {
                let session_id = self.state.lock().await.session.id.clone();
                if let Err(err) = self.store.checkpoint_response(&response_id, elapsed).await {
                    log_error!("Failed to checkpoint question {question_number} of {session_id}: {err:?}");
                }
                let update = SessionUpdate {
                    last_activity_at: Some(now),
                    ..SessionUpdate::default()
                };
                if let Err(err) = self.store.update_session(&session_id, update).await {
                    log_error!("Failed to record heartbeat for {session_id}: {err:?}");
                }
                let _ = self.events.send(SessionEvent::Heartbeat {
                    session_id,
                    question_number,
                    elapsed_seconds: elapsed,
                });
            }
            Action::Expire(question_number) => {
                if let Err(err) = self.on_timer_expire(question_number).await {
                    log_error!("Auto-submit of question {question_number} failed: {err}");
                }
            }
        }

        !self.state.lock().await.session.status.is_terminal()
    }

    /// Puts a session with nothing answered back to `NotStarted`.
    ///
    /// Nothing is deleted: an unanswered question shell stays in the store
    /// and is handed out again, with its full budget, on the next start.
    pub async fn restart(&self) -> Result<StateSnapshot> {
        let _gate = self.gate.lock().await;
        self.reconcile().await?;

        let (session_id, restart_count, active) = {
            let state = self.state.lock().await;
            let status = state.session.status;
            if status.is_terminal() {
                return Err(FlowError::InvalidState(format!(
                    "cannot restart a session that is {}",
                    status.as_str()
                )));
            }
            if state.session.current_question_index > 0 {
                return Err(FlowError::InvalidState(format!(
                    "session {} already has {} answered questions",
                    state.session.id, state.session.current_question_index
                )));
            }
            (
                state.session.id.clone(),
                state.session.restart_count + 1,
                state.active_response().map(|r| r.id.clone()),
            )
        };

        let now = Utc::now();
        self.persist(
            &session_id,
            SessionUpdate {
                status: Some(SessionStatus::NotStarted),
                restart_count: Some(restart_count),
                started_at: Some(None),
                last_activity_at: Some(now),
                ..SessionUpdate::default()
            },
        )
        .await?;
        if let Some(response_id) = &active {
            self.store
                .checkpoint_response(response_id, 0)
                .await
                .map_err(FlowError::store)?;
        }
        self.store
            .close_open_pauses(&session_id, now)
            .await
            .map_err(FlowError::store)?;

        {
            let mut state = self.state.lock().await;
            state.session.status = SessionStatus::NotStarted;
            state.session.restart_count = restart_count;
            state.session.started_at = None;
            state.session.last_activity_at = now;
            state.timer.clear();
            state.selected = None;
            state.last_result = None;
            for response in state.responses.iter_mut().filter(|r| !r.is_answered()) {
                response.elapsed_seconds = 0;
            }
        }
        self.stop_clock().await;
        log_info!("Session {session_id} restarted (restart #{restart_count})");

        Ok(self.emit_state().await)
    }

    /// Moves a stale session to the terminal `Expired` state.
    pub async fn expire(&self) -> Result<StateSnapshot> {
        let _gate = self.gate.lock().await;
        let now = Utc::now();
        let session_id = {
            let state = self.state.lock().await;
            if state.session.status.is_terminal() {
                return Ok(state.snapshot(self.settings.total_questions));
            }
            state.session.id.clone()
        };

        self.persist(&session_id, SessionUpdate::status(SessionStatus::Expired))
            .await?;
        self.store
            .close_open_pauses(&session_id, now)
            .await
            .map_err(FlowError::store)?;
        {
            let mut state = self.state.lock().await;
            state.session.status = SessionStatus::Expired;
            state.timer.clear();
        }
        self.stop_clock().await;
        log_warn!("Session {session_id} expired");

        Ok(self.emit_state().await)
    }

    /// Final result of a completed session.
    pub async fn summary(&self) -> Result<ScoreSummary> {
        let status = self.state.lock().await.session.status;
        if status != SessionStatus::Completed {
            return Err(FlowError::InvalidState(format!(
                "no result for a session that is {}",
                status.as_str()
            )));
        }
        self.ensure_summary().await
    }

    /// Stops the background clock. The controller stays usable.
    pub async fn shutdown(&self) {
        self.stop_clock().await;
    }

    /// Replaces the cached session with the store's copy and repairs the
    /// answered-count bookkeeping if a crash landed between two writes.
    async fn reconcile(&self) -> Result<()> {
        let session_id = self.state.lock().await.session.id.clone();
        let session = self
            .store
            .get_session(&session_id)
            .await
            .map_err(FlowError::store)?
            .ok_or_else(|| FlowError::NotFound(session_id.clone()))?;
        let responses = self
            .store
            .list_responses(&session_id)
            .await
            .map_err(FlowError::store)?;

        let answered = responses.iter().filter(|r| r.is_answered()).count() as u32;
        let total_score = running_total(&responses);
        let repair = (answered > session.current_question_index
            || total_score != session.total_score)
            .then(|| SessionUpdate {
                current_question_index: Some(answered.max(session.current_question_index)),
                total_score: Some(total_score),
                ..SessionUpdate::default()
            });
        if let Some(update) = repair {
            log_warn!("Session {session_id} bookkeeping out of date, repairing ({answered} answered)");
            self.persist(&session_id, update).await?;
        }

        let mut state = self.state.lock().await;
        let armed_question = state.active_response().map(|r| r.question_number);
        state.session = session;
        state.session.current_question_index = state.session.current_question_index.max(answered);
        state.session.total_score = total_score;
        state.responses = responses;
        if let Some(number) = armed_question {
            if state.active_response().map(|r| r.question_number) != Some(number) {
                state.timer.clear();
            }
        }
        if state.last_result.is_none() {
            state.last_result = state
                .responses
                .iter()
                .rev()
                .find_map(LastResult::from_response);
        }
        Ok(())
    }

    async fn advance_locked(&self) -> Result<()> {
        let total_questions = self.settings.total_questions;
        let (session_id, index) = {
            let state = self.state.lock().await;
            (state.session.id.clone(), state.session.current_question_index)
        };

        if index > total_questions {
            return Err(FlowError::Invariant(format!(
                "session {session_id} answered {index} of {total_questions} questions"
            )));
        }
        if index == total_questions {
            return self.complete_locked().await;
        }

        let question_number = index + 1;
        let difficulty = Difficulty::for_question(question_number);

        let existing = self
            .store
            .get_response(&session_id, question_number)
            .await
            .map_err(FlowError::store)?;

        let response = match existing {
            Some(response) if response.is_answered() => {
                return Err(FlowError::Invariant(format!(
                    "question {question_number} of session {session_id} is answered but the session index is {index}"
                )));
            }
            Some(response) => {
                log_info!("Reusing stored question {question_number} for session {session_id}");
                response
            }
            None => {
                let question = self
                    .oracle
                    .get_question(&session_id, question_number, difficulty)
                    .await
                    .map_err(|err| {
                        log_warn!(
                            "Oracle failed to provide question {question_number} for {session_id}: {err:?}"
                        );
                        FlowError::oracle(err)
                    })?;
                validate_question(&question, &session_id, question_number).map_err(|err| {
                    log_warn!("{err}");
                    err
                })?;

                let now = Utc::now();
                let response = Response {
                    id: Uuid::new_v4().to_string(),
                    session_id: session_id.clone(),
                    question_number,
                    difficulty,
                    time_limit_seconds: question
                        .time_limit_seconds
                        .unwrap_or_else(|| self.settings.time_budgets.for_difficulty(difficulty)),
                    question_id: question.id,
                    payload: question.payload,
                    elapsed_seconds: 0,
                    answer: None,
                    created_at: now,
                    updated_at: now,
                };
                self.store
                    .create_response(&response)
                    .await
                    .map_err(FlowError::store)?;
                response
            }
        };

        let now = Utc::now();
        self.persist(
            &session_id,
            SessionUpdate {
                last_activity_at: Some(now),
                ..SessionUpdate::default()
            },
        )
        .await?;

        let mut state = self.state.lock().await;
        let limit = response.time_limit_seconds;
        let remaining = limit.saturating_sub(response.elapsed_seconds);
        state.upsert_response(response);
        state.session.last_activity_at = now;
        state.selected = None;
        state.ticks_since_heartbeat = 0;
        state.timer.start_at(question_number, limit, remaining);
        if state.session.status == SessionStatus::Paused {
            state.timer.pause();
        }
        log_info!(
            "Session {session_id} on question {question_number}/{total_questions} ({}, {limit}s)",
            difficulty.as_str()
        );
        Ok(())
    }

    async fn finalize_locked(&self, question_number: u32, trigger: Finalize) -> Result<SubmitOutcome> {
        let timeout = trigger == Finalize::Timeout;

        let (response, selected, time_taken, auto_submitted) = {
            let state = self.state.lock().await;
            let status = state.session.status;
            let already = SubmitOutcome::AlreadyFinalized { question_number };

            if !matches!(status, SessionStatus::InProgress | SessionStatus::Paused) {
                if timeout {
                    return Ok(already);
                }
                return Err(FlowError::InvalidState(format!(
                    "cannot submit while the session is {}",
                    status.as_str()
                )));
            }
            if !timeout && status == SessionStatus::Paused {
                return Err(FlowError::InvalidState(
                    "resume the session before submitting".into(),
                ));
            }

            let Some(active) = state.active_response() else {
                return Ok(already);
            };
            if active.question_number != question_number {
                return Ok(already);
            }

            let timed_out = timeout || state.timer.is_expired_for(question_number);
            let selected = match &trigger {
                Finalize::Candidate(value) if !timed_out => {
                    if !active.payload.options.iter().any(|option| option == value) {
                        return Err(FlowError::InvalidState(format!(
                            "\"{value}\" is not an option of question {question_number}"
                        )));
                    }
                    value.clone()
                }
                // once time is up only what was selected before the deadline counts
                _ => state
                    .selected
                    .clone()
                    .or_else(|| active.payload.default_answer().map(str::to_string))
                    .ok_or_else(|| {
                        FlowError::Invariant(format!(
                            "question {question_number} of session {} has no options",
                            state.session.id
                        ))
                    })?,
            };

            let time_taken = if timed_out {
                active.time_limit_seconds
            } else if state.timer.is_armed_for(question_number) {
                state.timer.time_taken()
            } else {
                active.elapsed_seconds.min(active.time_limit_seconds)
            };

            (active.clone(), selected, time_taken, timed_out)
        };

        let session_id = response.session_id.clone();
        let grade = self
            .oracle
            .grade_answer(&response.question_id, &selected)
            .await
            .map_err(|err| {
                log_warn!(
                    "Oracle failed to grade question {question_number} of {session_id}: {err:?}"
                );
                FlowError::oracle(err)
            })?;
        validate_grade(&grade, self.settings.per_question_max, &session_id, question_number)
            .map_err(|err| {
                log_warn!("{err}");
                err
            })?;

        let answer = SubmittedAnswer {
            selected,
            time_taken_seconds: time_taken,
            grade: grade.into(),
            auto_submitted,
            answered_at: Utc::now(),
        };

        let mut answered = response;
        if let Err(err) = answered.record_answer(answer.clone()) {
            log_error!("{err}");
            return Err(err);
        }

        let written = self
            .store
            .record_answer(&answered.id, &answer)
            .await
            .map_err(FlowError::store)?;
        if !written {
            let err = FlowError::Invariant(format!(
                "store already holds an answer for question {question_number} of session {session_id}"
            ));
            log_error!("{err}");
            return Err(err);
        }

        let (index, total_score) = {
            let mut state = self.state.lock().await;
            state.upsert_response(answered.clone());
            state.session.current_question_index = question_number;
            state.session.total_score = running_total(&state.responses);
            state.timer.clear();
            state.selected = None;
            state.last_result = LastResult::from_response(&answered);
            (state.session.current_question_index, state.session.total_score)
        };

        let now = Utc::now();
        self.persist(
            &session_id,
            SessionUpdate {
                current_question_index: Some(index),
                total_score: Some(total_score),
                last_activity_at: Some(now),
                ..SessionUpdate::default()
            },
        )
        .await?;
        self.state.lock().await.session.last_activity_at = now;

        log_info!(
            "Session {session_id} question {question_number} scored {} in {time_taken}s{}",
            answer.grade.score,
            if auto_submitted { " (time up)" } else { "" }
        );
        if auto_submitted {
            let _ = self.events.send(SessionEvent::TimeUp {
                session_id: session_id.clone(),
                question_number,
            });
        }
        self.emit_state().await;

        self.advance_locked().await?;

        Ok(SubmitOutcome::Recorded {
            question_number,
            auto_submitted,
        })
    }

    async fn complete_locked(&self) -> Result<()> {
        let (session_id, status) = {
            let state = self.state.lock().await;
            (state.session.id.clone(), state.session.status)
        };
        if status == SessionStatus::Completed {
            return Ok(());
        }

        let responses = self
            .store
            .list_responses(&session_id)
            .await
            .map_err(FlowError::store)?;
        let summary = aggregate(
            &responses,
            self.settings.total_questions,
            self.settings.per_question_max,
        )
        .map_err(|err| {
            log_error!("{err}");
            err
        })?;

        let now = Utc::now();
        self.persist(
            &session_id,
            SessionUpdate {
                status: Some(SessionStatus::Completed),
                total_score: Some(summary.total_score),
                completed_at: Some(now),
                last_activity_at: Some(now),
                ..SessionUpdate::default()
            },
        )
        .await?;
        self.store
            .close_open_pauses(&session_id, now)
            .await
            .map_err(FlowError::store)?;

        {
            let mut state = self.state.lock().await;
            state.responses = responses;
            state.session.status = SessionStatus::Completed;
            state.session.total_score = summary.total_score;
            state.session.completed_at = Some(now);
            state.session.last_activity_at = now;
            state.timer.clear();
            state.summary = Some(summary.clone());
        }
        self.stop_clock().await;

        log_info!(
            "Session {session_id} completed: {}/{} ({}%)",
            summary.total_score,
            summary.max_score,
            summary.percentage
        );
        self.emit_state().await;
        let _ = self.events.send(SessionEvent::Completed {
            session_id,
            summary,
        });
        Ok(())
    }

    async fn ensure_summary(&self) -> Result<ScoreSummary> {
        let mut state = self.state.lock().await;
        if let Some(summary) = &state.summary {
            return Ok(summary.clone());
        }
        let summary = aggregate(
            &state.responses,
            self.settings.total_questions,
            self.settings.per_question_max,
        )?;
        state.summary = Some(summary.clone());
        Ok(summary)
    }

    async fn persist(&self, session_id: &str, update: SessionUpdate) -> Result<()> {
        if let Some(next) = update.status {
            let current = self.state.lock().await.session.status;
            let restart = next == SessionStatus::NotStarted && !current.is_terminal();
            if !current.can_transition_to(next) && !restart {
                let err = FlowError::Invariant(format!(
                    "session {session_id} cannot move from {} to {}",
                    current.as_str(),
                    next.as_str()
                ));
                log_error!("{err}");
                return Err(err);
            }
        }

        let updated_at = self
            .store
            .update_session(session_id, update)
            .await
            .map_err(|err| {
                log_error!("Failed to persist session {session_id}: {err:?}");
                FlowError::store(err)
            })?;
        self.state.lock().await.session.updated_at = updated_at;
        Ok(())
    }

    async fn emit_state(&self) -> StateSnapshot {
        let snapshot = self.snapshot().await;
        let _ = self.events.send(SessionEvent::StateChanged(snapshot.clone()));
        snapshot
    }

    async fn ensure_clock(&self) {
        if !self.drive_clock {
            return;
        }
        if self.state.lock().await.session.status.is_terminal() {
            return;
        }

        let mut ticker = self.ticker.lock().await;
        if ticker.is_running() {
            return;
        }
        let controller = self.clone();
        ticker.spawn(self.settings.tick_interval(), move || {
            let controller = controller.clone();
            async move { controller.tick().await }
        });
    }

    async fn stop_clock(&self) {
        self.ticker.lock().await.stop();
    }
}
