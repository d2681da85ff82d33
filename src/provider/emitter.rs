//! Per-run event delivery.
//!
//! Every adapter talks to the caller's sink through a [`RunEmitter`], which
//! enforces the stream contract: at most one `Started`, exactly one
//! `Completed`, nothing after `Completed`, and a panicking sink never unwinds
//! into adapter state.

use crate::types::{EventSink, TestGenEvent, TestGenEventKind};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Invoke a sink, swallowing any panic it raises.
pub(crate) fn deliver(sink: &EventSink, event: TestGenEvent) {
    if catch_unwind(AssertUnwindSafe(|| sink(event))).is_err() {
        tracing::warn!("event sink panicked; event dropped");
    }
}

/// Cloneable handle used by one run to emit events.
#[derive(Clone)]
pub struct RunEmitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    task_id: String,
    sink: EventSink,
    started: AtomicBool,
    completed: AtomicBool,
}

impl RunEmitter {
    pub fn new(task_id: impl Into<String>, sink: EventSink) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                task_id: task_id.into(),
                sink,
                started: AtomicBool::new(false),
                completed: AtomicBool::new(false),
            }),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    /// Emit a non-terminal event. Returns whether it reached the sink.
    ///
    /// `Completed` passed here is routed through [`RunEmitter::complete`].
    pub fn emit(&self, kind: TestGenEventKind) -> bool {
        if let TestGenEventKind::Completed { exit_code } = kind {
            return self.complete(exit_code);
        }
        if self.is_completed() {
            return false;
        }
        if matches!(kind, TestGenEventKind::Started { .. })
            && self.inner.started.swap(true, Ordering::AcqRel)
        {
            return false;
        }
        deliver(&self.inner.sink, TestGenEvent::new(&self.inner.task_id, kind));
        true
    }

    pub fn info(&self, message: impl Into<String>) -> bool {
        self.emit(TestGenEventKind::info(message))
    }

    pub fn warn(&self, message: impl Into<String>) -> bool {
        self.emit(TestGenEventKind::warn(message))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TestGenEventKind::error(message))
    }

    /// Emit the terminal event. Only the first call has any effect.
    pub fn complete(&self, exit_code: Option<i32>) -> bool {
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        deliver(
            &self.inner.sink,
            TestGenEvent::new(&self.inner.task_id, TestGenEventKind::Completed { exit_code }),
        );
        true
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::EventLog;
    use crate::types::LogLevel;

    #[test]
    fn completed_fires_once_and_closes_the_stream() {
        let log = EventLog::new();
        let emitter = RunEmitter::new("t1", log.sink());
        assert!(emitter.info("hello"));
        assert!(emitter.complete(Some(0)));
        assert!(!emitter.complete(Some(1)));
        assert!(!emitter.info("late"));
        assert!(!emitter.emit(TestGenEventKind::Completed { exit_code: None }));

        let kinds = log.kinds();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[1], TestGenEventKind::Completed { exit_code: Some(0) });
    }

    #[test]
    fn started_is_delivered_at_most_once() {
        let log = EventLog::new();
        let emitter = RunEmitter::new("t1", log.sink());
        let started = || TestGenEventKind::Started {
            label: "x".into(),
            detail: "y".into(),
        };
        assert!(emitter.emit(started()));
        assert!(!emitter.emit(started()));
        assert!(emitter.has_started());
        assert_eq!(log.kinds().len(), 1);
    }

    #[test]
    fn panicking_sink_does_not_poison_the_emitter() {
        let sink: EventSink = Arc::new(|event: TestGenEvent| {
            if matches!(event.kind, TestGenEventKind::Log { level: LogLevel::Info, .. }) {
                panic!("ui handler blew up");
            }
        });
        let emitter = RunEmitter::new("t1", sink);
        assert!(emitter.info("boom"));
        assert!(emitter.complete(Some(0)));
        assert!(emitter.is_completed());
    }

    #[test]
    fn events_carry_the_task_id() {
        let log = EventLog::new();
        let emitter = RunEmitter::new("task-42", log.sink());
        emitter.warn("w");
        assert!(log.events().iter().all(|e| e.task_id == "task-42"));
    }
}
