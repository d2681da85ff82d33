//! Remote backend: a Devin session driven by HTTP polling.
//!
//! A run creates one session, then polls it until it finishes, expires,
//! stays blocked, or exceeds the polling ceiling. Transport failures only
//! slow polling down; they never end the run on their own.

pub mod attachments;
pub mod backoff;
pub mod client;
pub mod types;

pub use client::{DevinClient, SessionApi};
pub use types::{SessionSnapshot, SessionStatus};

use crate::config::DevinConfig;
use crate::error::ApiError;
use crate::provider::emitter::RunEmitter;
use crate::provider::single_flight::SingleFlight;
use crate::provider::{RunningTask, TestGenProvider};
use crate::textutil::truncate_with_suffix_by_chars;
use crate::types::{BackendKind, RunRequest, TestGenEventKind};
use backoff::PollBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use types::CreateSessionRequest;

/// Upper bound on the best-effort `DELETE` issued after cancellation.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_TITLE_CHARS: usize = 80;

pub struct DevinProvider {
    settings: Arc<DevinConfig>,
    api: Option<Arc<dyn SessionApi>>,
    flight: SingleFlight,
}

impl DevinProvider {
    /// Provider backed by the real HTTP client; without an API key every run
    /// fails fast.
    pub fn from_config(config: &DevinConfig) -> Self {
        let api = config.api_key().map(|key| {
            Arc::new(DevinClient::new(&config.base_url, key)) as Arc<dyn SessionApi>
        });
        Self {
            settings: Arc::new(config.clone()),
            api,
            flight: SingleFlight::new(),
        }
    }

    /// Provider backed by an arbitrary session API implementation.
    pub fn with_api(config: DevinConfig, api: Arc<dyn SessionApi>) -> Self {
        Self {
            settings: Arc::new(config),
            api: Some(api),
            flight: SingleFlight::new(),
        }
    }

    pub fn active_task_id(&self) -> Option<String> {
        self.flight.active_task_id()
    }
}

impl TestGenProvider for DevinProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Devin
    }

    fn run(&self, request: RunRequest) -> RunningTask {
        let flight = self.flight.begin(&request.task_id);
        let emitter = RunEmitter::new(&request.task_id, request.sink.clone());
        if let Some(old) = &flight.superseded {
            tracing::warn!(task_id = %request.task_id, superseded = %old, "superseding running session");
            emitter.warn(format!("Superseded still-running task {old}"));
        }

        let api = self.api.clone();
        let settings = Arc::clone(&self.settings);
        let mut cancel_rx = flight.cancel_rx;
        let guard = flight.guard;
        tokio::spawn(async move {
            let exit_code = match api {
                Some(api) => {
                    let mut session = SessionRun {
                        api: api.as_ref(),
                        settings: &settings,
                        emitter: &emitter,
                        cancel_rx: &mut cancel_rx,
                    };
                    session.drive(&request).await
                }
                None => {
                    emitter.error(
                        "Devin API key is not configured (set TESTGEN_DEVIN_API_KEY or DEVIN_API_KEY)",
                    );
                    None
                }
            };
            guard.release();
            emitter.complete(exit_code);
        });
        flight.handle
    }
}

/// Wait until cancellation is requested; pends forever if it never can be.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Follow-up bookkeeping for blocked sessions.
#[derive(Debug, Default)]
struct UnblockState {
    attempts: u32,
    replies_at_last_attempt: usize,
    polls_since_attempt: u32,
}

/// Progress through one session's message list.
#[derive(Debug)]
struct RemoteSession {
    id: String,
    url: Option<String>,
    forwarded: usize,
    replies: usize,
    last_status: Option<SessionStatus>,
    marker_seen: bool,
}

struct SessionRun<'a> {
    api: &'a dyn SessionApi,
    settings: &'a DevinConfig,
    emitter: &'a RunEmitter,
    cancel_rx: &'a mut watch::Receiver<bool>,
}

enum Step<T> {
    Done(T),
    Cancelled,
}

impl SessionRun<'_> {
    async fn drive(&mut self, request: &RunRequest) -> Option<i32> {
        // `None` when the ceiling lies past what `Instant` can represent.
        let deadline = Instant::now().checked_add(self.settings.max_poll_duration());

        let prompt = tokio::select! {
            prompt = attachments::prepare_prompt(
                self.api,
                &request.prompt,
                self.settings.inline_prompt_limit,
                self.settings.truncated_prompt_size,
                self.emitter,
            ) => prompt,
            _ = cancelled(self.cancel_rx) => return None,
        };
        let create = CreateSessionRequest {
            prompt,
            idempotent: self.settings.idempotent,
            tags: self.settings.tags.clone(),
            title: session_title(&request.prompt),
        };

        let created = match self.create_with_retry(&create, deadline).await {
            Step::Done(Ok(created)) => created,
            Step::Done(Err(err)) => {
                tracing::error!(task_id = self.emitter.task_id(), error = %err, "session create failed");
                self.emitter
                    .error(format!("Failed to create Devin session: {err}"));
                return None;
            }
            Step::Cancelled => return None,
        };
        tracing::info!(task_id = self.emitter.task_id(), session_id = %created.session_id, "session created");

        let mut session = RemoteSession {
            id: created.session_id,
            url: created.url,
            forwarded: 0,
            replies: 0,
            last_status: None,
            marker_seen: false,
        };
        let detail = match &session.url {
            Some(url) => format!("session {} ({url})", session.id),
            None => format!("session {}", session.id),
        };
        self.emitter.emit(TestGenEventKind::Started {
            label: BackendKind::Devin.label().to_string(),
            detail,
        });

        let code = self.poll(&mut session, deadline).await;
        match code {
            Step::Done(code) => code,
            Step::Cancelled => {
                self.terminate(&session.id).await;
                None
            }
        }
    }

    async fn create_with_retry(
        &mut self,
        create: &CreateSessionRequest,
        deadline: Option<Instant>,
    ) -> Step<Result<types::CreatedSession, ApiError>> {
        let mut backoff = self.backoff();
        loop {
            let result = tokio::select! {
                result = self.api.create_session(create) => result,
                _ = cancelled(self.cancel_rx) => return Step::Cancelled,
            };
            match result {
                Err(err) if err.is_transient() => {
                    let delay = backoff.on_failure(err.retry_after_secs().map(Duration::from_secs));
                    if overruns(deadline, delay) {
                        return Step::Done(Err(err));
                    }
                    tracing::warn!(task_id = self.emitter.task_id(), error = %err, ?delay, "session create failed; retrying");
                    if let Step::Cancelled = self.sleep(delay).await {
                        return Step::Cancelled;
                    }
                }
                other => return Step::Done(other),
            }
        }
    }

    async fn poll(
        &mut self,
        session: &mut RemoteSession,
        deadline: Option<Instant>,
    ) -> Step<Option<i32>> {
        let mut backoff = self.backoff();
        let mut unblock = UnblockState::default();
        loop {
            let delay = backoff.current();
            if overruns(deadline, delay) {
                self.emitter.error(format!(
                    "Devin session {} did not finish within {}s; giving up",
                    session.id, self.settings.max_poll_secs
                ));
                self.terminate(&session.id).await;
                return Step::Done(None);
            }
            if let Step::Cancelled = self.sleep(delay).await {
                return Step::Cancelled;
            }

            let result = tokio::select! {
                result = self.api.get_session(&session.id) => result,
                _ = cancelled(self.cancel_rx) => return Step::Cancelled,
            };
            let snapshot = match result {
                Ok(snapshot) => {
                    backoff.reset();
                    snapshot
                }
                Err(err) if err.is_transient() => {
                    let next = backoff.on_failure(err.retry_after_secs().map(Duration::from_secs));
                    tracing::warn!(task_id = self.emitter.task_id(), session_id = %session.id, error = %err, ?next, "poll failed; backing off");
                    continue;
                }
                Err(err) => {
                    tracing::error!(task_id = self.emitter.task_id(), session_id = %session.id, error = %err, "poll failed");
                    self.emitter.error(format!("Devin API error: {err}"));
                    return Step::Done(None);
                }
            };

            self.forward_messages(session, &snapshot);
            let status = snapshot.status();
            if session.last_status != Some(status) {
                tracing::info!(task_id = self.emitter.task_id(), session_id = %session.id, ?status, "session status");
                session.last_status = Some(status);
            }

            match status {
                SessionStatus::Finished => {
                    if let Some(url) = snapshot.pull_request_url() {
                        self.emitter.info(format!("Pull request: {url}"));
                    }
                    self.emitter.info("Devin session finished");
                    return Step::Done(Some(0));
                }
                SessionStatus::Expired => {
                    self.emitter.warn("Devin session expired before finishing");
                    return Step::Done(Some(1));
                }
                SessionStatus::Blocked => {
                    if session.marker_seen {
                        self.emitter
                            .info("Devin reported the work complete and is waiting for input");
                        return Step::Done(Some(0));
                    }
                    if let Some(step) = self.handle_blocked(session, &mut unblock).await {
                        return step;
                    }
                }
                _ => {}
            }
        }
    }

    /// Decide what to do with a blocked session. `Some` ends the run.
    async fn handle_blocked(
        &mut self,
        session: &RemoteSession,
        unblock: &mut UnblockState,
    ) -> Option<Step<Option<i32>>> {
        let has_new_replies = session.replies > unblock.replies_at_last_attempt;
        let settled = unblock.polls_since_attempt >= self.settings.settle_polls;
        let ready = unblock.attempts == 0 || has_new_replies || settled;
        if !ready {
            unblock.polls_since_attempt += 1;
            return None;
        }
        if unblock.attempts >= self.settings.max_unblock_attempts {
            self.emitter.warn(format!(
                "Devin is still waiting for input after {} follow-up(s); stopping",
                unblock.attempts
            ));
            return Some(Step::Done(Some(1)));
        }

        unblock.attempts += 1;
        unblock.replies_at_last_attempt = session.replies;
        unblock.polls_since_attempt = 0;
        let message = self.follow_up_message();
        let sent = tokio::select! {
            sent = self.api.send_message(&session.id, &message) => sent,
            _ = cancelled(self.cancel_rx) => return Some(Step::Cancelled),
        };
        match sent {
            Ok(()) => {
                self.emitter.info(format!(
                    "Devin is waiting for input; asked it to continue ({}/{})",
                    unblock.attempts, self.settings.max_unblock_attempts
                ));
                None
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(task_id = self.emitter.task_id(), error = %err, "follow-up failed");
                self.emitter
                    .warn(format!("Could not send follow-up to Devin: {err}"));
                None
            }
            Err(err) => {
                self.emitter.error(format!("Devin API error: {err}"));
                Some(Step::Done(None))
            }
        }
    }

    fn follow_up_message(&self) -> String {
        let mut message = String::from(
            "Please continue without asking for confirmation. Make reasonable assumptions \
             and finish writing the tests.",
        );
        if let Some(marker) = self.settings.completion_markers.first() {
            message.push_str(&format!(" Reply with {marker} when you are done."));
        }
        message
    }

    /// Forward messages not seen before, skipping the echoed prompt.
    fn forward_messages(&self, session: &mut RemoteSession, snapshot: &SessionSnapshot) {
        let visible = snapshot
            .messages
            .iter()
            .filter(|m| !m.is_initial_prompt())
            .collect::<Vec<_>>();
        for message in visible.iter().skip(session.forwarded) {
            if message.is_from_user() {
                continue;
            }
            session.replies += 1;
            if self
                .settings
                .completion_markers
                .iter()
                .any(|marker| !marker.is_empty() && message.message.contains(marker.as_str()))
            {
                session.marker_seen = true;
            }
            let text = message.message.trim();
            if !text.is_empty() {
                self.emitter.info(text);
            }
        }
        session.forwarded = session.forwarded.max(visible.len());
    }

    async fn sleep(&mut self, delay: Duration) -> Step<()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Step::Done(()),
            _ = cancelled(self.cancel_rx) => Step::Cancelled,
        }
    }

    async fn terminate(&self, session_id: &str) {
        match tokio::time::timeout(TERMINATE_TIMEOUT, self.api.terminate_session(session_id)).await {
            Ok(Ok(())) => {
                tracing::info!(task_id = self.emitter.task_id(), %session_id, "session terminated");
            }
            Ok(Err(err)) => {
                tracing::warn!(task_id = self.emitter.task_id(), %session_id, error = %err, "session terminate failed");
            }
            Err(_) => {
                tracing::warn!(task_id = self.emitter.task_id(), %session_id, "session terminate timed out");
            }
        }
    }

    fn backoff(&self) -> PollBackoff {
        PollBackoff::new(
            self.settings.poll_interval(),
            self.settings.backoff_multiplier,
            self.settings.max_backoff(),
        )
    }
}

/// Whether waiting `delay` from now would pass `deadline`.
fn overruns(deadline: Option<Instant>, delay: Duration) -> bool {
    deadline.is_some_and(|deadline| {
        Instant::now()
            .checked_add(delay)
            .is_none_or(|wake| wake > deadline)
    })
}

/// First non-blank prompt line, shortened for the session list.
fn session_title(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| truncate_with_suffix_by_chars(line, SESSION_TITLE_CHARS, "…"))
}
