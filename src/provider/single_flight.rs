//! Per-provider single-flight execution state.
//!
//! A provider runs at most one task at a time. Starting a new run cancels the
//! active one; every transition is keyed by a generation number so a stale
//! run (or a stale handle) can never clear the state of its successor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Default)]
enum ExecState {
    #[default]
    Idle,
    Running {
        generation: u64,
        task_id: String,
        cancel: Arc<watch::Sender<bool>>,
    },
}

type SharedState = Arc<Mutex<ExecState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ExecState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clear the state only if it still belongs to `generation`.
fn clear_if_current(state: &SharedState, generation: u64) -> bool {
    let mut guard = lock(state);
    match &*guard {
        ExecState::Running { generation: g, .. } if *g == generation => {
            *guard = ExecState::Idle;
            true
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct SingleFlight {
    state: SharedState,
    generations: AtomicU64,
}

/// Everything a newly admitted run needs.
pub struct Flight {
    pub handle: RunningTask,
    pub cancel_rx: watch::Receiver<bool>,
    pub guard: FlightGuard,
    /// Task id of the run this one replaced.
    pub superseded: Option<String>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any active run and register `task_id` as the running task.
    pub fn begin(&self, task_id: &str) -> Flight {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);

        let superseded = {
            let mut guard = lock(&self.state);
            let previous = std::mem::replace(
                &mut *guard,
                ExecState::Running {
                    generation,
                    task_id: task_id.to_string(),
                    cancel: Arc::clone(&cancel),
                },
            );
            match previous {
                ExecState::Running {
                    task_id: old_id,
                    cancel: old_cancel,
                    ..
                } => {
                    old_cancel.send_replace(true);
                    Some(old_id)
                }
                ExecState::Idle => None,
            }
        };

        Flight {
            handle: RunningTask {
                task_id: task_id.to_string(),
                inner: Arc::new(HandleInner {
                    disposed: AtomicBool::new(false),
                    cancel,
                    state: Arc::clone(&self.state),
                    generation,
                }),
            },
            cancel_rx,
            guard: FlightGuard {
                state: Arc::clone(&self.state),
                generation,
            },
            superseded,
        }
    }

    /// Task id of the active run, if any.
    pub fn active_task_id(&self) -> Option<String> {
        match &*lock(&self.state) {
            ExecState::Running { task_id, .. } => Some(task_id.clone()),
            ExecState::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(&*lock(&self.state), ExecState::Idle)
    }
}

/// Held by the run itself; releases the provider on the terminal transition.
pub struct FlightGuard {
    state: SharedState,
    generation: u64,
}

impl FlightGuard {
    /// Return the provider to idle unless a newer run already owns it.
    pub fn release(&self) -> bool {
        clear_if_current(&self.state, self.generation)
    }
}

/// Caller-facing handle to one run.
#[derive(Clone)]
pub struct RunningTask {
    task_id: String,
    inner: Arc<HandleInner>,
}

struct HandleInner {
    disposed: AtomicBool,
    cancel: Arc<watch::Sender<bool>>,
    state: SharedState,
    generation: u64,
}

impl RunningTask {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Request cancellation. Idempotent and safe from any thread.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.send_replace(true);
        if clear_if_current(&self.inner.state, self.inner.generation) {
            tracing::debug!(task_id = %self.task_id, "run disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RunningTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningTask")
            .field("task_id", &self.task_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
