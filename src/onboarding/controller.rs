//! OnboardingController — drives one board's onboarding conversation.
//!
//! Holds the current session snapshot, turns user actions into collaborator
//! calls, and keeps the poll scheduler armed exactly while the conversation
//! is waiting on the assistant and the page is visible.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ApiError, OnboardingError, Operation};

use super::activity::PageActivitySource;
use super::api::OnboardingApi;
use super::model::{AnswerPayload, OTHER_OPTION, Session, SessionStatus};
use super::poller::PollScheduler;
use super::question::{ParsedMessage, parse_latest};
use super::sequence::{RequestLedger, RequestTicket};
use super::state::{ControllerView, ConversationPhase, InFlight, SurfacedError};

/// Invoked once, after the session has been confirmed.
pub type ConfirmedCallback = Box<dyn FnOnce() + Send>;

/// Handle to a mounted onboarding conversation. Cheap to clone.
#[derive(Clone)]
pub struct OnboardingController {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn OnboardingApi>,
    activity: Arc<dyn PageActivitySource>,
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    on_confirmed: StdMutex<Option<ConfirmedCallback>>,
    poller: PollScheduler,
    view_tx: watch::Sender<ControllerView>,
    visibility: StdMutex<Option<JoinHandle<()>>>,
    weak_self: Weak<Inner>,
}

struct ControllerState {
    board_id: String,
    session: Option<Session>,
    in_flight: InFlight,
    /// Background refreshes still outstanding in the current epoch.
    refreshes: u32,
    error: Option<SurfacedError>,
    reconnecting: bool,
    selected_option: Option<String>,
    ledger: RequestLedger,
    shut_down: bool,
}

impl ControllerState {
    fn new(board_id: String) -> Self {
        Self {
            board_id,
            session: None,
            in_flight: InFlight::default(),
            refreshes: 0,
            error: None,
            reconnecting: false,
            selected_option: None,
            ledger: RequestLedger::new(),
            shut_down: false,
        }
    }

    fn phase(&self) -> ConversationPhase {
        ConversationPhase::project(self.session.as_ref(), &self.in_flight, self.error.as_ref())
    }

    fn view(&self) -> ControllerView {
        ControllerView {
            board_id: self.board_id.clone(),
            phase: self.phase(),
            message: self.session.as_ref().and_then(parse_latest),
            selected_option: self.selected_option.clone(),
            draft_goal: self.session.as_ref().and_then(|s| s.draft_goal.clone()),
            loading: self.in_flight,
            error: self.error.clone(),
            reconnecting: self.reconnecting,
        }
    }

    fn ids(&self) -> Option<(String, String)> {
        self.session
            .as_ref()
            .map(|s| (s.board_id.clone(), s.id.clone()))
    }

    fn current_message(&self) -> Option<ParsedMessage> {
        self.session.as_ref().and_then(parse_latest)
    }

    /// Replace the held session wholesale.
    fn replace_session(&mut self, session: Session) {
        let advanced = self
            .session
            .as_ref()
            .is_none_or(|held| held.messages.len() != session.messages.len());
        if advanced {
            self.selected_option = None;
        }
        self.session = Some(session);
    }

    /// Whether a refreshed snapshot may replace the held one.
    fn accepts_refresh(&self, incoming: &Session) -> Result<(), &'static str> {
        let Some(held) = self.session.as_ref() else {
            return Err("no session held");
        };
        if held.id != incoming.id || held.board_id != incoming.board_id {
            return Err("belongs to a different session");
        }
        if incoming.messages.len() < held.messages.len() {
            return Err("has fewer messages than the held session");
        }
        if held.status == SessionStatus::Confirmed && incoming.status != SessionStatus::Confirmed {
            return Err("would reopen a confirmed session");
        }
        Ok(())
    }

    fn finish_refresh(&mut self, ticket: &RequestTicket) {
        if self.ledger.same_epoch(ticket) {
            self.refreshes = self.refreshes.saturating_sub(1);
            self.in_flight.refreshing = self.refreshes > 0;
        }
    }
}

impl OnboardingController {
    /// Create a controller for `board_id` without contacting the server.
    ///
    /// Must be called within a Tokio runtime when `activity` pushes changes.
    pub fn new(
        board_id: impl Into<String>,
        api: Arc<dyn OnboardingApi>,
        activity: Arc<dyn PageActivitySource>,
        config: ControllerConfig,
        on_confirmed: impl FnOnce() + Send + 'static,
    ) -> Self {
        let board_id = board_id.into();
        let on_confirmed: ConfirmedCallback = Box::new(on_confirmed);
        let (view_tx, _view_rx) = watch::channel(ControllerView::initial(board_id.clone()));
        let inner = Arc::new_cyclic(|weak_self| Inner {
            api,
            activity,
            config,
            state: Mutex::new(ControllerState::new(board_id)),
            on_confirmed: StdMutex::new(Some(on_confirmed)),
            poller: PollScheduler::new(),
            view_tx,
            visibility: StdMutex::new(None),
            weak_self: weak_self.clone(),
        });
        inner.watch_visibility();
        Self { inner }
    }

    /// Create a controller and start its session.
    ///
    /// A failed start still returns the controller (in `Failed`) so the host
    /// can offer `retry`.
    pub async fn mount(
        board_id: impl Into<String>,
        api: Arc<dyn OnboardingApi>,
        activity: Arc<dyn PageActivitySource>,
        config: ControllerConfig,
        on_confirmed: impl FnOnce() + Send + 'static,
    ) -> Self {
        let controller = Self::new(board_id, api, activity, config, on_confirmed);
        if let Err(e) = controller.start().await {
            warn!(error = %e, "Onboarding start failed");
        }
        controller
    }

    /// Current view snapshot.
    pub fn view(&self) -> ControllerView {
        self.inner.view_tx.borrow().clone()
    }

    /// Observe every view change.
    pub fn subscribe(&self) -> watch::Receiver<ControllerView> {
        self.inner.view_tx.subscribe()
    }

    pub fn phase(&self) -> ConversationPhase {
        self.view().phase
    }

    /// Whether the poll scheduler is currently armed.
    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_armed()
    }

    /// Start a session if none is held.
    pub async fn start(&self) -> Result<(), OnboardingError> {
        self.inner.start().await
    }

    /// Fetch the latest snapshot now.
    ///
    /// Failures leave the held session and phase untouched; the error is
    /// returned for the caller's information only.
    pub async fn refresh(&self) -> Result<(), OnboardingError> {
        self.inner.refresh(false).await
    }

    /// Submit an answer to the current question.
    ///
    /// A submission while another is outstanding is ignored.
    pub async fn submit_answer(&self, payload: AnswerPayload) -> Result<(), OnboardingError> {
        match self.inner.submit_answer(payload).await {
            Err(OnboardingError::DuplicateSubmission) => {
                debug!("Ignoring duplicate answer submission");
                Ok(())
            }
            other => other,
        }
    }

    /// Highlight one of the current question's options.
    pub async fn select_option(&self, label: &str) -> Result<(), OnboardingError> {
        let mut st = self.inner.state.lock().await;
        if st.shut_down {
            return Err(OnboardingError::ShutDown);
        }
        let phase = st.phase();
        if !phase.accepts_answer() {
            return Err(OnboardingError::NotAllowed {
                action: "select an option",
                phase,
            });
        }
        let offered = st
            .current_message()
            .is_some_and(|m| m.has_option(label));
        if !offered {
            return Err(OnboardingError::InvalidUserInput(format!(
                "{label:?} is not one of the offered options"
            )));
        }
        st.selected_option = Some(label.to_string());
        self.inner.commit(&st);
        Ok(())
    }

    /// Submit the highlighted option.
    pub async fn submit_selection(&self) -> Result<(), OnboardingError> {
        let selected = self.inner.state.lock().await.selected_option.clone();
        match selected {
            Some(label) => self.submit_answer(AnswerPayload::Option(label)).await,
            None => Err(OnboardingError::InvalidUserInput(
                "no option selected".to_string(),
            )),
        }
    }

    /// Submit typed prose. Sent as the "Other" choice when one is offered.
    pub async fn submit_free_text(&self, text: &str) -> Result<(), OnboardingError> {
        let has_other = {
            let st = self.inner.state.lock().await;
            st.current_message()
                .is_some_and(|m| m.has_option(OTHER_OPTION))
        };
        let payload = if has_other {
            AnswerPayload::Other(text.to_string())
        } else {
            AnswerPayload::FreeText(text.to_string())
        };
        self.submit_answer(payload).await
    }

    /// Confirm the drafted goal.
    pub async fn confirm_goal(&self) -> Result<(), OnboardingError> {
        self.inner.confirm().await
    }

    /// Clear a surfaced error and resume the conversation.
    pub async fn retry(&self) -> Result<(), OnboardingError> {
        let restart = {
            let mut st = self.inner.state.lock().await;
            if st.shut_down {
                return Err(OnboardingError::ShutDown);
            }
            let busy = st.in_flight.starting || st.in_flight.submitting || st.in_flight.confirming;
            if busy {
                debug!("Retry ignored while a request is outstanding");
                return Ok(());
            }
            st.error = None;
            st.reconnecting = false;
            if st
                .session
                .as_ref()
                .is_some_and(|s| s.status == SessionStatus::Abandoned)
            {
                info!(board_id = %st.board_id, "Discarding abandoned onboarding session");
                st.session = None;
                st.selected_option = None;
            }
            let restart = st.session.is_none();
            self.inner.commit(&st);
            restart
        };
        if restart {
            self.start().await
        } else {
            Ok(())
        }
    }

    /// Switch to another board: drop the session and every outstanding
    /// request, then start afresh.
    pub async fn change_board(&self, board_id: impl Into<String>) -> Result<(), OnboardingError> {
        let board_id = board_id.into();
        {
            let mut st = self.inner.state.lock().await;
            if st.shut_down {
                return Err(OnboardingError::ShutDown);
            }
            if st.board_id == board_id {
                return Ok(());
            }
            info!(from = %st.board_id, to = %board_id, "Onboarding board changed");
            self.inner.poller.disarm();
            st.ledger.invalidate_all();
            st.board_id = board_id;
            st.session = None;
            st.in_flight = InFlight::default();
            st.refreshes = 0;
            st.error = None;
            st.reconnecting = false;
            st.selected_option = None;
            self.inner.commit(&st);
        }
        self.start().await
    }

    /// Unmount: cancel timers and ignore every response still in flight.
    pub async fn shutdown(&self) {
        {
            let mut st = self.inner.state.lock().await;
            if st.shut_down {
                return;
            }
            st.shut_down = true;
            st.ledger.invalidate_all();
            st.in_flight = InFlight::default();
            st.refreshes = 0;
            self.inner.commit(&st);
        }
        self.inner.teardown();
        info!("Onboarding controller shut down");
    }
}

impl Inner {
    /// Publish the view and re-evaluate polling. Called after every change.
    fn commit(&self, st: &ControllerState) {
        let view = st.view();
        let phase = view.phase;
        self.view_tx.send_replace(view);
        self.sync_polling(phase, st.shut_down);
    }

    fn sync_polling(&self, phase: ConversationPhase, shut_down: bool) {
        if !shut_down && phase.wants_polling() && self.activity.is_active() {
            let weak = self.weak_self.clone();
            self.poller.arm(self.config.poll_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.poll_tick().await;
                    }
                }
            });
        } else {
            self.poller.disarm();
        }
    }

    fn watch_visibility(&self) {
        let Some(mut rx) = self.activity.changes() else {
            return;
        };
        let weak = self.weak_self.clone();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let active = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!(active, "Page visibility changed");
                let st = inner.state.lock().await;
                inner.sync_polling(st.phase(), st.shut_down);
            }
        });
        *lock_std(&self.visibility) = Some(handle);
    }

    fn teardown(&self) {
        self.poller.shutdown();
        if let Some(handle) = lock_std(&self.visibility).take() {
            handle.abort();
        }
    }

    async fn poll_tick(&self) {
        if let Err(e) = self.refresh(true).await {
            debug!(error = %e, "Background refresh did not apply");
        }
    }

    async fn start(&self) -> Result<(), OnboardingError> {
        let (board_id, ticket) = {
            let mut st = self.state.lock().await;
            if st.shut_down {
                return Err(OnboardingError::ShutDown);
            }
            if st.in_flight.starting || st.session.is_some() {
                debug!(board_id = %st.board_id, "Onboarding session already started");
                return Ok(());
            }
            st.in_flight.starting = true;
            st.error = None;
            let ticket = st.ledger.issue(Operation::Start);
            self.commit(&st);
            (st.board_id.clone(), ticket)
        };

        let result = self.api.start_session(&board_id).await;

        let mut st = self.state.lock().await;
        if !st.ledger.is_current(&ticket) {
            debug!(board_id = %board_id, "Dropping stale start response");
            return Ok(());
        }
        st.in_flight.starting = false;
        let outcome = match result.and_then(|s| ensure_board(s, &board_id)) {
            Ok(session) => {
                info!(
                    board_id = %board_id,
                    session_id = %session.id,
                    messages = session.messages.len(),
                    "Onboarding session started"
                );
                st.replace_session(session);
                st.reconnecting = false;
                Ok(())
            }
            Err(e) => Err(self.surface(&mut st, Operation::Start, e)),
        };
        self.commit(&st);
        outcome
    }

    async fn refresh(&self, from_scheduler: bool) -> Result<(), OnboardingError> {
        let (board_id, session_id, ticket) = {
            let mut st = self.state.lock().await;
            if st.shut_down {
                return Err(OnboardingError::ShutDown);
            }
            if from_scheduler {
                if st.in_flight.refreshing {
                    debug!("Skipping poll tick, refresh already in flight");
                    return Ok(());
                }
                if !st.phase().wants_polling() || !self.activity.is_active() {
                    return Ok(());
                }
            }
            let Some((board_id, session_id)) = st.ids() else {
                return Err(OnboardingError::NotAllowed {
                    action: "refresh",
                    phase: st.phase(),
                });
            };
            st.refreshes += 1;
            st.in_flight.refreshing = true;
            let ticket = st.ledger.issue(Operation::Refresh);
            self.commit(&st);
            (board_id, session_id, ticket)
        };

        let result = self.api.get_session(&board_id, &session_id).await;

        let mut st = self.state.lock().await;
        st.finish_refresh(&ticket);
        let outcome = if !st.ledger.is_current(&ticket) {
            debug!(session_id = %session_id, "Dropping stale refresh response");
            Ok(())
        } else {
            match result {
                Ok(session) => match st.accepts_refresh(&session) {
                    Ok(()) => {
                        debug!(
                            session_id = %session_id,
                            messages = session.messages.len(),
                            status = %session.status,
                            "Applied refreshed session"
                        );
                        st.replace_session(session);
                        st.reconnecting = false;
                        Ok(())
                    }
                    Err(reason) => {
                        warn!(session_id = %session_id, reason, "Ignoring refreshed session");
                        Ok(())
                    }
                },
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Background refresh failed");
                    st.reconnecting = true;
                    Err(OnboardingError::from_api(Operation::Refresh, e))
                }
            }
        };
        self.commit(&st);
        outcome
    }

    async fn submit_answer(&self, payload: AnswerPayload) -> Result<(), OnboardingError> {
        let (board_id, session_id, ticket) = {
            let mut st = self.state.lock().await;
            if st.shut_down {
                return Err(OnboardingError::ShutDown);
            }
            if st.in_flight.submitting {
                return Err(OnboardingError::DuplicateSubmission);
            }
            let phase = st.phase();
            if !phase.accepts_answer() {
                return Err(OnboardingError::NotAllowed {
                    action: "submit an answer",
                    phase,
                });
            }
            payload.validate()?;
            let Some((board_id, session_id)) = st.ids() else {
                return Err(OnboardingError::NotAllowed {
                    action: "submit an answer",
                    phase,
                });
            };
            st.in_flight.submitting = true;
            let ticket = st.ledger.issue(Operation::Answer);
            self.commit(&st);
            (board_id, session_id, ticket)
        };

        info!(session_id = %session_id, answer = ?payload, "Submitting onboarding answer");
        let result = self
            .api
            .answer_session(&board_id, &session_id, &payload)
            .await;

        let mut st = self.state.lock().await;
        if !st.ledger.is_current(&ticket) {
            debug!(session_id = %session_id, "Dropping stale answer response");
            return Ok(());
        }
        st.in_flight.submitting = false;
        let outcome = match result.and_then(|s| ensure_session(s, &board_id, &session_id)) {
            Ok(session) => {
                st.replace_session(session);
                st.selected_option = None;
                st.reconnecting = false;
                Ok(())
            }
            Err(e) => Err(self.surface(&mut st, Operation::Answer, e)),
        };
        self.commit(&st);
        debug!(phase = %st.phase(), "Answer processed");
        outcome
    }

    async fn confirm(&self) -> Result<(), OnboardingError> {
        let (board_id, session_id, ticket) = {
            let mut st = self.state.lock().await;
            if st.shut_down {
                return Err(OnboardingError::ShutDown);
            }
            let phase = st.phase();
            if phase.is_terminal() {
                debug!("Onboarding already confirmed");
                return Ok(());
            }
            if st.in_flight.confirming {
                debug!("Ignoring duplicate confirm");
                return Ok(());
            }
            let has_draft = st.session.as_ref().is_some_and(Session::has_draft_goal);
            if !has_draft || phase != ConversationPhase::AwaitingUserAnswer {
                return Err(OnboardingError::NotAllowed {
                    action: "confirm",
                    phase,
                });
            }
            let Some((board_id, session_id)) = st.ids() else {
                return Err(OnboardingError::NotAllowed {
                    action: "confirm",
                    phase,
                });
            };
            st.in_flight.confirming = true;
            let ticket = st.ledger.issue(Operation::Confirm);
            self.commit(&st);
            (board_id, session_id, ticket)
        };

        let result = self.api.confirm_session(&board_id, &session_id).await;

        let confirmed = {
            let mut st = self.state.lock().await;
            if !st.ledger.is_current(&ticket) {
                debug!(session_id = %session_id, "Dropping stale confirm response");
                return Ok(());
            }
            st.in_flight.confirming = false;
            let result = result
                .and_then(|s| ensure_session(s, &board_id, &session_id))
                .and_then(|s| match s.status {
                    SessionStatus::Confirmed => Ok(s),
                    other => Err(ApiError::Malformed(format!(
                        "confirm returned a session with status {other}"
                    ))),
                });
            let outcome = match result {
                Ok(session) => {
                    info!(board_id = %board_id, session_id = %session_id, "Onboarding confirmed");
                    st.replace_session(session);
                    Ok(())
                }
                Err(e) => Err(self.surface(&mut st, Operation::Confirm, e)),
            };
            self.commit(&st);
            outcome
        };

        if confirmed.is_ok() {
            self.fire_confirmed();
        }
        confirmed
    }

    /// Record a user-visible failure; the phase projects to `Failed`.
    fn surface(
        &self,
        st: &mut ControllerState,
        operation: Operation,
        err: ApiError,
    ) -> OnboardingError {
        let err = OnboardingError::from_api(operation, err);
        warn!(board_id = %st.board_id, %operation, error = %err, "Onboarding request failed");
        st.error = Some(SurfacedError::new(operation, &err));
        err
    }

    fn fire_confirmed(&self) {
        let callback = lock_std(&self.on_confirmed).take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn ensure_board(session: Session, board_id: &str) -> Result<Session, ApiError> {
    if session.board_id != board_id {
        return Err(ApiError::Malformed(format!(
            "session belongs to board {}, expected {board_id}",
            session.board_id
        )));
    }
    Ok(session)
}

fn ensure_session(session: Session, board_id: &str, session_id: &str) -> Result<Session, ApiError> {
    let session = ensure_board(session, board_id)?;
    if session.id != session_id {
        return Err(ApiError::Malformed(format!(
            "expected session {session_id}, got {}",
            session.id
        )));
    }
    Ok(session)
}

fn lock_std<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
