//! Configuration data model.
//!
//! Every section is `#[serde(default)]`, so a missing file, a missing
//! section, and a missing key all fall back to the built-in values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::defaults::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_COMPLETION_MARKER, DEFAULT_DEVIN_BASE_URL,
    DEFAULT_INLINE_PROMPT_LIMIT, DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MAX_POLL_SECS,
    DEFAULT_MAX_UNBLOCK_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SESSION_TAG,
    DEFAULT_SETTLE_POLLS, DEFAULT_TRUNCATED_PROMPT_SIZE,
};
use crate::liveness::LivenessThresholds;
use crate::types::BackendKind;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub liveness: LivenessConfig,
    pub devin: DevinConfig,
    pub commands: CommandsConfig,
}

/// Watchdog thresholds in whole seconds (`[liveness]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub initial_heartbeat_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub silence_warn_secs: u64,
    pub silence_log_interval_secs: u64,
    pub check_interval_secs: u64,
    pub ignored_summary_secs: u64,
    pub auto_kill_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        let t = LivenessThresholds::default();
        Self {
            initial_heartbeat_secs: t.initial_heartbeat_delay.as_secs(),
            heartbeat_interval_secs: t.heartbeat_interval.as_secs(),
            silence_warn_secs: t.silence_warn_after.as_secs(),
            silence_log_interval_secs: t.silence_log_interval.as_secs(),
            check_interval_secs: t.check_interval.as_secs(),
            ignored_summary_secs: t.ignored_summary_window.as_secs(),
            auto_kill_secs: t.auto_kill_after.as_secs(),
        }
    }
}

impl LivenessConfig {
    pub fn thresholds(&self) -> LivenessThresholds {
        LivenessThresholds {
            initial_heartbeat_delay: Duration::from_secs(self.initial_heartbeat_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            silence_warn_after: Duration::from_secs(self.silence_warn_secs),
            silence_log_interval: Duration::from_secs(self.silence_log_interval_secs),
            // A zero interval would spin the watchdog.
            check_interval: Duration::from_secs(self.check_interval_secs.max(1)),
            ignored_summary_window: Duration::from_secs(self.ignored_summary_secs),
            auto_kill_after: Duration::from_secs(self.auto_kill_secs),
        }
    }
}

/// Remote session tunables (`[devin]`).
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DevinConfig {
    pub base_url: String,
    /// Bearer token; usually supplied through the environment.
    pub api_key: Option<String>,
    pub poll_interval_secs: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_secs: u64,
    /// Wall-clock ceiling on polling one session.
    pub max_poll_secs: u64,
    /// "Continue without asking" follow-ups sent to a blocked session.
    pub max_unblock_attempts: u32,
    /// Polls to wait after a follow-up before sending another.
    pub settle_polls: u32,
    /// Prompts longer than this (in chars) are moved into attachments.
    pub inline_prompt_limit: usize,
    /// Size a prompt is cut to when attachment upload fails.
    pub truncated_prompt_size: usize,
    /// Text that marks the session's work as done even if it then blocks.
    pub completion_markers: Vec<String>,
    pub tags: Vec<String>,
    pub idempotent: bool,
}

impl Default for DevinConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DEVIN_BASE_URL.to_string(),
            api_key: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            max_poll_secs: DEFAULT_MAX_POLL_SECS,
            max_unblock_attempts: DEFAULT_MAX_UNBLOCK_ATTEMPTS,
            settle_polls: DEFAULT_SETTLE_POLLS,
            inline_prompt_limit: DEFAULT_INLINE_PROMPT_LIMIT,
            truncated_prompt_size: DEFAULT_TRUNCATED_PROMPT_SIZE,
            completion_markers: vec![DEFAULT_COMPLETION_MARKER.to_string()],
            tags: vec![DEFAULT_SESSION_TAG.to_string()],
            idempotent: false,
        }
    }
}

impl DevinConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_secs(self.max_poll_secs)
    }

    /// API key with surrounding whitespace removed; blank counts as missing.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl fmt::Debug for DevinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevinConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key().map(|_| "<redacted>"))
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("max_poll_secs", &self.max_poll_secs)
            .field("max_unblock_attempts", &self.max_unblock_attempts)
            .field("settle_polls", &self.settle_polls)
            .field("inline_prompt_limit", &self.inline_prompt_limit)
            .field("truncated_prompt_size", &self.truncated_prompt_size)
            .field("completion_markers", &self.completion_markers)
            .field("tags", &self.tags)
            .field("idempotent", &self.idempotent)
            .finish()
    }
}

/// Per-backend binary overrides (`[commands]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub claude: Option<String>,
    pub codex: Option<String>,
    pub gemini: Option<String>,
    pub cursor: Option<String>,
}

impl CommandsConfig {
    pub fn for_backend(&self, kind: BackendKind) -> Option<String> {
        let command = match kind {
            BackendKind::Claude => &self.claude,
            BackendKind::Codex => &self.codex,
            BackendKind::Gemini => &self.gemini,
            BackendKind::Cursor => &self.cursor,
            BackendKind::Devin => return None,
        };
        command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    pub(super) fn slot_mut(&mut self, kind: BackendKind) -> Option<&mut Option<String>> {
        match kind {
            BackendKind::Claude => Some(&mut self.claude),
            BackendKind::Codex => Some(&mut self.codex),
            BackendKind::Gemini => Some(&mut self.gemini),
            BackendKind::Cursor => Some(&mut self.cursor),
            BackendKind::Devin => None,
        }
    }
}
