//! Generic adapter for backends that run as a local child process.
//!
//! A [`ProcessBackend`] describes one CLI (binary, argv, prompt delivery, line
//! mapper); [`ProcessProvider`] supplies everything else: spawning, stdout
//! line splitting, stderr forwarding, liveness monitoring, cancellation, and
//! the single terminal event.

pub mod env;
pub mod line_buffer;
mod runner;

use crate::backends::{ClaudeBackend, CodexBackend, CursorBackend, GeminiBackend};
use crate::liveness::LivenessThresholds;
use crate::mapping::{LineMapper, MapContext};
use crate::provider::emitter::RunEmitter;
use crate::provider::single_flight::SingleFlight;
use crate::provider::{RunningTask, TestGenProvider};
use crate::textutil::truncate_with_suffix_by_chars;
use crate::types::{BackendKind, OutputFormat, RunRequest};
use std::sync::Arc;

/// Static description of one CLI backend.
pub trait ProcessBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Binary used when the request does not override `command`.
    fn default_command(&self) -> &'static str;

    /// Arguments after the program name.
    fn build_args(&self, request: &RunRequest) -> Vec<String>;

    /// Text written to stdin before it is closed; `None` closes it at once.
    fn stdin_payload(&self, request: &RunRequest) -> Option<String>;

    /// Whether the line protocol carries its own start marker in `format`.
    fn protocol_announces_start(&self, _format: OutputFormat) -> bool {
        false
    }

    fn new_mapper(&self, ctx: MapContext) -> Box<dyn LineMapper>;
}

/// Fully resolved child invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn build<B: ProcessBackend + ?Sized>(
        backend: &B,
        request: &RunRequest,
        env: Vec<(String, String)>,
    ) -> Self {
        let program = request
            .command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .unwrap_or(backend.default_command())
            .to_string();
        Self {
            program,
            args: backend.build_args(request),
            stdin: backend.stdin_payload(request),
            env,
        }
    }

    /// Human-readable command line with `prompt` elided.
    pub fn describe(&self, prompt: &str) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            if !prompt.is_empty() && arg == prompt {
                parts.push("<prompt>".to_string());
            } else if arg.chars().any(char::is_whitespace) {
                parts.push(format!("{:?}", truncate_with_suffix_by_chars(arg, 60, "…")));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Provider for any process backend.
pub struct ProcessProvider<B: ProcessBackend> {
    backend: Arc<B>,
    flight: SingleFlight,
    thresholds: LivenessThresholds,
    child_env: Vec<(String, String)>,
    default_command: Option<String>,
}

pub type ClaudeProvider = ProcessProvider<ClaudeBackend>;
pub type CodexProvider = ProcessProvider<CodexBackend>;
pub type GeminiProvider = ProcessProvider<GeminiBackend>;
pub type CursorProvider = ProcessProvider<CursorBackend>;

impl<B: ProcessBackend + Default> Default for ProcessProvider<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: ProcessBackend> ProcessProvider<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            flight: SingleFlight::new(),
            thresholds: LivenessThresholds::default(),
            child_env: env::child_env_overrides(|key| std::env::var(key).ok()),
            default_command: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: LivenessThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Replace the host-derived child environment overrides.
    pub fn with_child_env(mut self, env: Vec<(String, String)>) -> Self {
        self.child_env = env;
        self
    }

    /// Binary used when a request doesn't name one.
    pub fn with_default_command(mut self, command: Option<String>) -> Self {
        self.default_command = command.filter(|c| !c.trim().is_empty());
        self
    }

    /// Task id of the run currently in flight.
    pub fn active_task_id(&self) -> Option<String> {
        self.flight.active_task_id()
    }
}

impl<B: ProcessBackend> TestGenProvider for ProcessProvider<B> {
    fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    fn run(&self, mut request: RunRequest) -> RunningTask {
        if request.command.is_none() {
            request.command = self.default_command.clone();
        }
        let flight = self.flight.begin(&request.task_id);
        let emitter = RunEmitter::new(&request.task_id, request.sink.clone());
        if let Some(old) = &flight.superseded {
            tracing::warn!(task_id = %request.task_id, superseded = %old, "superseding running task");
            emitter.warn(format!("Superseded still-running task {old}"));
        }

        let invocation = Invocation::build(&*self.backend, &request, self.child_env.clone());
        let announce = !self
            .backend
            .protocol_announces_start(request.output_format);
        let job = runner::RunJob {
            kind: self.backend.kind(),
            mapper: self
                .backend
                .new_mapper(MapContext::new(request.workspace_root.clone())),
            detail: invocation.describe(&request.prompt),
            invocation,
            workspace_root: request.workspace_root.clone(),
            output_format: request.output_format,
            announce_on_spawn: announce,
            thresholds: self.thresholds,
        };
        let handle = flight.handle.clone();
        tokio::spawn(runner::drive(job, emitter, flight.cancel_rx, flight.guard));
        handle
    }
}
