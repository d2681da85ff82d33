//! Await a run's terminal event as a future.

use super::emitter::deliver;
use super::{RunningTask, TestGenProvider};
use crate::types::{EventSink, RunRequest, TestGenEvent, TestGenEventKind};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

type TaskHook = Box<dyn FnOnce(&RunningTask) + Send>;

#[derive(Default)]
pub struct CompletionOptions {
    /// Overall deadline; on expiry the run is disposed and `None` returned.
    pub timeout: Option<Duration>,
    /// Receives the handle synchronously, before any awaiting.
    pub on_task: Option<TaskHook>,
}

impl CompletionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_task(mut self, hook: impl FnOnce(&RunningTask) + Send + 'static) -> Self {
        self.on_task = Some(Box::new(hook));
        self
    }
}

/// Run `request` and resolve with its exit code.
///
/// Never fails: spawn errors, transport failures, and timeouts all resolve
/// to `None`. Events still reach the request's sink; a panicking sink is
/// contained.
pub async fn run_to_completion(
    provider: &dyn TestGenProvider,
    request: RunRequest,
    options: CompletionOptions,
) -> Option<i32> {
    let (done_tx, done_rx) = oneshot::channel::<Option<i32>>();
    let done_tx = Arc::new(Mutex::new(Some(done_tx)));
    // Held across check and delivery so nothing can slip in after `Completed`.
    let closed = Arc::new(Mutex::new(false));
    let task_id = request.task_id.clone();

    let sink: EventSink = {
        let user_sink = request.sink.clone();
        let closed = Arc::clone(&closed);
        let done_tx = Arc::clone(&done_tx);
        Arc::new(move |event: TestGenEvent| {
            let mut closed = closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *closed {
                return;
            }
            let exit = match event.kind {
                TestGenEventKind::Completed { exit_code } => {
                    *closed = true;
                    Some(exit_code)
                }
                _ => None,
            };
            deliver(&user_sink, event);
            drop(closed);
            if let Some(code) = exit {
                let sender = done_tx
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                if let Some(sender) = sender {
                    let _ = sender.send(code);
                }
            }
        })
    };

    let task = provider.run(request.with_sink(Arc::clone(&sink)));
    if let Some(hook) = options.on_task {
        if catch_unwind(AssertUnwindSafe(|| hook(&task))).is_err() {
            tracing::warn!(%task_id, "on_task hook panicked");
        }
    }

    let Some(limit) = options.timeout else {
        return done_rx.await.unwrap_or(None);
    };
    match tokio::time::timeout(limit, done_rx).await {
        Ok(result) => result.unwrap_or(None),
        Err(_) => {
            tracing::warn!(%task_id, ?limit, "run timed out");
            sink(TestGenEvent::new(
                &task_id,
                TestGenEventKind::error(format!(
                    "Timed out after {}s; stopping the run",
                    limit.as_secs()
                )),
            ));
            task.dispose();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::emitter::RunEmitter;
    use crate::provider::single_flight::SingleFlight;
    use crate::testsupport::EventLog;
    use crate::types::{BackendKind, LogLevel};

    /// Provider that completes (or not) on a timer.
    struct ScriptedProvider {
        flight: SingleFlight,
        finish_after: Option<Duration>,
        exit_code: Option<i32>,
    }

    impl TestGenProvider for ScriptedProvider {
        fn kind(&self) -> BackendKind {
            BackendKind::Claude
        }

        fn run(&self, request: RunRequest) -> RunningTask {
            let flight = self.flight.begin(&request.task_id);
            let emitter = RunEmitter::new(&request.task_id, request.sink.clone());
            let finish_after = self.finish_after;
            let exit_code = self.exit_code;
            let mut cancel_rx = flight.cancel_rx;
            let guard = flight.guard;
            tokio::spawn(async move {
                emitter.info("working");
                let finish = async {
                    match finish_after {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = finish => {
                        guard.release();
                        emitter.complete(exit_code);
                    }
                    _ = cancel_rx.changed() => {
                        guard.release();
                        emitter.complete(None);
                    }
                }
            });
            flight.handle
        }
    }

    fn provider(finish_after: Option<Duration>, exit_code: Option<i32>) -> ScriptedProvider {
        ScriptedProvider {
            flight: SingleFlight::new(),
            finish_after,
            exit_code,
        }
    }

    fn request(log: &EventLog) -> RunRequest {
        RunRequest::new("t1", "/tmp", "p", log.sink())
    }

    /// Provider that completes from a plain OS thread, ignoring cancellation.
    struct ThreadedProvider {
        flight: SingleFlight,
        finish_after: Duration,
    }

    impl TestGenProvider for ThreadedProvider {
        fn kind(&self) -> BackendKind {
            BackendKind::Codex
        }

        fn run(&self, request: RunRequest) -> RunningTask {
            let flight = self.flight.begin(&request.task_id);
            let emitter = RunEmitter::new(&request.task_id, request.sink.clone());
            let guard = flight.guard;
            let delay = self.finish_after;
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                guard.release();
                emitter.complete(Some(0));
            });
            flight.handle
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_with_the_exit_code() {
        let log = EventLog::new();
        let provider = provider(Some(Duration::from_secs(1)), Some(3));
        let code = run_to_completion(&provider, request(&log), CompletionOptions::default()).await;
        assert_eq!(code, Some(3));
        assert_eq!(log.assert_single_terminal(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_logs_disposes_and_resolves_none() {
        let log = EventLog::new();
        let provider = provider(None, Some(0));
        let options = CompletionOptions::default().with_timeout(Duration::from_secs(5));
        let code = run_to_completion(&provider, request(&log), options).await;
        assert_eq!(code, None);
        assert!(log
            .messages(LogLevel::Error)
            .iter()
            .any(|m| m.contains("Timed out after 5s")));

        // Disposal cancels the run, which then terminates exactly once.
        assert!(log.wait_for_completion(Duration::from_secs(1)).await);
        assert_eq!(log.assert_single_terminal(), None);
        assert!(provider.flight.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn on_task_hook_sees_the_handle() {
        let log = EventLog::new();
        let provider = provider(Some(Duration::from_millis(10)), Some(0));
        let seen = Arc::new(Mutex::new(None));
        let seen_in_hook = Arc::clone(&seen);
        let options = CompletionOptions::default().on_task(move |task| {
            *seen_in_hook.lock().unwrap() = Some(task.task_id().to_string());
        });
        run_to_completion(&provider, request(&log), options).await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sink_still_resolves() {
        let provider = provider(Some(Duration::from_millis(10)), Some(0));
        let sink: EventSink = Arc::new(|_| panic!("sink exploded"));
        let request = RunRequest::new("t1", "/tmp", "p", sink);
        let code = run_to_completion(&provider, request, CompletionOptions::default()).await;
        assert_eq!(code, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn events_after_completion_are_dropped() {
        let log = EventLog::new();
        let provider = provider(Some(Duration::from_millis(10)), Some(0));
        // Timeout longer than the run: nothing should trail the terminal event.
        let options = CompletionOptions::default().with_timeout(Duration::from_secs(60));
        run_to_completion(&provider, request(&log), options).await;
        assert_eq!(log.assert_single_terminal(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_log_never_trails_a_racing_completion() {
        let log = EventLog::new();
        let inner = log.sink();
        let slow_sink: EventSink = Arc::new(move |event: TestGenEvent| {
            if matches!(event.kind, TestGenEventKind::Log { .. }) {
                std::thread::sleep(Duration::from_millis(800));
            }
            inner(event);
        });
        let provider = ThreadedProvider {
            flight: SingleFlight::new(),
            finish_after: Duration::from_millis(1500),
        };
        let options = CompletionOptions::default().with_timeout(Duration::from_secs(1));
        let code = run_to_completion(
            &provider,
            RunRequest::new("t1", "/tmp", "p", slow_sink),
            options,
        )
        .await;

        assert_eq!(code, None);
        assert!(log.wait_for_completion(Duration::from_secs(5)).await);
        assert_eq!(log.assert_single_terminal(), Some(0));
        assert!(log
            .messages(LogLevel::Error)
            .iter()
            .any(|m| m.contains("Timed out after 1s")));
    }
}
