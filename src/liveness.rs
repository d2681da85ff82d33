//! Liveness watchdog for process-backed runs.
//!
//! The monitor never touches the child or the sink directly. The process
//! adapter reports what it observed (`observe_*`) and periodically calls
//! [`LivenessMonitor::tick`]; the returned actions are executed by the adapter.
//! Termination is only ever *requested* here; the exit path still owns the
//! terminal event.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Thresholds driving the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessThresholds {
    /// Delay before the first "still waiting" heartbeat.
    pub initial_heartbeat_delay: Duration,
    /// Spacing between heartbeats while no output has arrived.
    pub heartbeat_interval: Duration,
    /// Silence after output before the first "quiet" log.
    pub silence_warn_after: Duration,
    /// Minimum spacing between "quiet" logs.
    pub silence_log_interval: Duration,
    /// How often the adapter calls `tick`.
    pub check_interval: Duration,
    /// Time without a visible event before summarizing ignored traffic.
    pub ignored_summary_window: Duration,
    /// Silence after which termination is requested.
    pub auto_kill_after: Duration,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            initial_heartbeat_delay: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            silence_warn_after: Duration::from_secs(10),
            silence_log_interval: Duration::from_secs(30),
            check_interval: Duration::from_secs(5),
            ignored_summary_window: Duration::from_secs(30),
            auto_kill_after: Duration::from_secs(10 * 60),
        }
    }
}

/// Categories of protocol traffic that produce no visible event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    /// Internal reasoning / thinking deltas.
    Reasoning,
    /// Echoed user input or tool results.
    Echo,
    /// Anything else deliberately dropped (partial stream frames, bookkeeping).
    Other,
}

/// Side effect requested by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessAction {
    /// Emit an info-level log.
    Log(String),
    /// Request termination of the child; carries the reason.
    Terminate(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IgnoredCounts {
    reasoning: u64,
    echo: u64,
    other: u64,
}

impl IgnoredCounts {
    fn total(&self) -> u64 {
        self.reasoning + self.echo + self.other
    }
}

/// Per-run watchdog state.
#[derive(Debug)]
pub struct LivenessMonitor {
    thresholds: LivenessThresholds,
    started_at: Instant,
    // Heartbeat phase ends permanently on first output.
    heartbeat_active: bool,
    // `None` once the schedule runs past what `Instant` can represent.
    next_heartbeat_at: Option<Instant>,
    last_output_at: Option<Instant>,
    last_silence_log_at: Option<Instant>,
    last_visible_at: Instant,
    ignored: IgnoredCounts,
    parsed: u64,
    last_raw_tag: Option<String>,
    last_summary_at: Option<Instant>,
    ignored_at_last_summary: u64,
    kill_requested: bool,
}

impl LivenessMonitor {
    pub fn new(thresholds: LivenessThresholds, now: Instant) -> Self {
        Self {
            thresholds,
            started_at: now,
            heartbeat_active: true,
            next_heartbeat_at: now.checked_add(thresholds.initial_heartbeat_delay),
            last_output_at: None,
            last_silence_log_at: None,
            last_visible_at: now,
            ignored: IgnoredCounts::default(),
            parsed: 0,
            last_raw_tag: None,
            last_summary_at: None,
            ignored_at_last_summary: 0,
            kill_requested: false,
        }
    }

    pub fn thresholds(&self) -> &LivenessThresholds {
        &self.thresholds
    }

    /// Any stdout/stderr bytes arrived.
    pub fn observe_output(&mut self, now: Instant) {
        self.heartbeat_active = false;
        self.last_output_at = Some(now);
        self.last_silence_log_at = None;
    }

    /// A protocol line was parsed and produced a visible event.
    pub fn observe_parsed(&mut self, tag: Option<&str>) {
        self.parsed += 1;
        self.note_tag(tag);
    }

    /// A protocol line was parsed but intentionally dropped.
    pub fn observe_ignored(&mut self, kind: NoiseKind, tag: Option<&str>) {
        match kind {
            NoiseKind::Reasoning => self.ignored.reasoning += 1,
            NoiseKind::Echo => self.ignored.echo += 1,
            NoiseKind::Other => self.ignored.other += 1,
        }
        self.note_tag(tag);
    }

    /// A non-liveness event reached the caller.
    pub fn observe_visible_event(&mut self, now: Instant) {
        self.last_visible_at = now;
    }

    pub fn has_output(&self) -> bool {
        self.last_output_at.is_some()
    }

    pub fn ignored_total(&self) -> u64 {
        self.ignored.total()
    }

    pub fn parsed_total(&self) -> u64 {
        self.parsed
    }

    pub fn kill_requested(&self) -> bool {
        self.kill_requested
    }

    fn note_tag(&mut self, tag: Option<&str>) {
        if let Some(tag) = tag {
            self.last_raw_tag = Some(tag.to_string());
        }
    }

    /// Advance the clock and collect any due actions.
    pub fn tick(&mut self, now: Instant) -> Vec<LivenessAction> {
        let mut actions = Vec::new();
        self.heartbeat(now, &mut actions);
        self.silence(now, &mut actions);
        self.ignored_summary(now, &mut actions);
        self.auto_kill(now, &mut actions);
        actions
    }

    fn heartbeat(&mut self, now: Instant, actions: &mut Vec<LivenessAction>) {
        if !self.heartbeat_active || self.next_heartbeat_at.is_none_or(|at| now < at) {
            return;
        }
        let waited = now.saturating_duration_since(self.started_at);
        actions.push(LivenessAction::Log(format!(
            "Still waiting for first output ({}s elapsed)",
            waited.as_secs()
        )));
        self.next_heartbeat_at = now.checked_add(self.thresholds.heartbeat_interval);
    }

    fn silence(&mut self, now: Instant, actions: &mut Vec<LivenessAction>) {
        let Some(last_output) = self.last_output_at else {
            return;
        };
        let quiet = now.saturating_duration_since(last_output);
        if quiet < self.thresholds.silence_warn_after {
            return;
        }
        let due = self.last_silence_log_at.is_none_or(|logged| {
            now.saturating_duration_since(logged) >= self.thresholds.silence_log_interval
        });
        if !due {
            return;
        }
        actions.push(LivenessAction::Log(format!(
            "No output for {}s; backend is still running",
            quiet.as_secs()
        )));
        self.last_silence_log_at = Some(now);
    }

    fn ignored_summary(&mut self, now: Instant, actions: &mut Vec<LivenessAction>) {
        let window = self.thresholds.ignored_summary_window;
        if now.saturating_duration_since(self.last_visible_at) < window {
            return;
        }
        let total = self.ignored.total();
        if total <= self.ignored_at_last_summary {
            return;
        }
        if self
            .last_summary_at
            .is_some_and(|at| now.saturating_duration_since(at) < window)
        {
            return;
        }
        let last_tag = self.last_raw_tag.as_deref().unwrap_or("unknown");
        actions.push(LivenessAction::Log(format!(
            "Backend busy: {total} internal events without visible output \
             (reasoning: {}, echo: {}, other: {}; parsed: {}; last event: {last_tag})",
            self.ignored.reasoning, self.ignored.echo, self.ignored.other, self.parsed
        )));
        self.last_summary_at = Some(now);
        self.ignored_at_last_summary = total;
    }

    fn auto_kill(&mut self, now: Instant, actions: &mut Vec<LivenessAction>) {
        if self.kill_requested {
            return;
        }
        let since = self.last_output_at.unwrap_or(self.started_at);
        let quiet = now.saturating_duration_since(since);
        if quiet < self.thresholds.auto_kill_after {
            return;
        }
        self.kill_requested = true;
        actions.push(LivenessAction::Terminate(format!(
            "No output for {}s (limit {}s); terminating backend",
            quiet.as_secs(),
            self.thresholds.auto_kill_after.as_secs()
        )));
    }
}
