//! Run request and normalized event model shared by every backend.
//!
//! Callers build a [`RunRequest`], hand it to a provider, and receive
//! [`TestGenEvent`] values through the request's sink. The event stream for a
//! run always ends with exactly one [`TestGenEventKind::Completed`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Callback invoked synchronously for every event of a run.
pub type EventSink = Arc<dyn Fn(TestGenEvent) + Send + Sync>;

/// Backend identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Claude,
    Codex,
    Gemini,
    Cursor,
    Devin,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Claude,
        BackendKind::Codex,
        BackendKind::Gemini,
        BackendKind::Cursor,
        BackendKind::Devin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Cursor => "cursor",
            Self::Devin => "devin",
        }
    }

    /// Human-facing label used in `Started` events.
    pub fn label(self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::Codex => "Codex CLI",
            Self::Gemini => "Gemini CLI",
            Self::Cursor => "Cursor Agent",
            Self::Devin => "Devin",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                format!("unknown backend `{s}` (expected claude, codex, gemini, cursor, or devin)")
            })
    }
}

/// Output format requested from the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    Json,
    #[default]
    StreamJson,
}

impl OutputFormat {
    /// Flag value shared by the CLIs that take `--output-format`.
    pub fn flag_value(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "stream-json" | "stream_json" | "jsonl" => Ok(Self::StreamJson),
            other => Err(format!(
                "unknown output format `{other}` (expected text, json, or stream-json)"
            )),
        }
    }
}

/// Immutable description of one agent task.
#[derive(Clone)]
pub struct RunRequest {
    pub task_id: String,
    /// Workspace root; also the child's working directory.
    pub workspace_root: PathBuf,
    /// Overrides the backend's default binary.
    pub command: Option<String>,
    pub prompt: String,
    pub model: Option<String>,
    pub output_format: OutputFormat,
    pub allow_writes: bool,
    pub sink: EventSink,
}

impl RunRequest {
    pub fn new(
        task_id: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        prompt: impl Into<String>,
        sink: EventSink,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            workspace_root: workspace_root.into(),
            command: None,
            prompt: prompt.into(),
            model: None,
            output_format: OutputFormat::default(),
            allow_writes: true,
            sink,
        }
    }

    /// Same request with a different sink.
    pub fn with_sink(&self, sink: EventSink) -> Self {
        Self {
            sink,
            ..self.clone()
        }
    }
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("task_id", &self.task_id)
            .field("workspace_root", &self.workspace_root)
            .field("command", &self.command)
            .field("prompt_len", &self.prompt.len())
            .field("model", &self.model)
            .field("output_format", &self.output_format)
            .field("allow_writes", &self.allow_writes)
            .finish_non_exhaustive()
    }
}

/// Severity of a free-form log event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// Event payload variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TestGenEventKind {
    Started {
        label: String,
        detail: String,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    FileWrite {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines_created: Option<u64>,
    },
    /// Terminal event. `None` means transport failure or timeout.
    Completed {
        exit_code: Option<i32>,
    },
}

impl TestGenEventKind {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
        }
    }

    pub fn file_write(path: impl Into<String>, lines_created: Option<u64>) -> Self {
        Self::FileWrite {
            path: path.into(),
            lines_created,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// One event delivered to a run's sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestGenEvent {
    pub task_id: String,
    pub ts_unix_ms: u64,
    #[serde(flatten)]
    pub kind: TestGenEventKind,
}

impl TestGenEvent {
    pub fn new(task_id: impl Into<String>, kind: TestGenEventKind) -> Self {
        Self {
            task_id: task_id.into(),
            ts_unix_ms: now_unix_millis(),
            kind,
        }
    }
}

pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|delta| delta.as_millis() as u64)
        .unwrap_or(0)
}
