//! Drive loop for one child process.
//!
//! Stdout, stderr, the watchdog tick, and cancellation are multiplexed on a
//! single task. The loop ends when both pipes close (or a killed child fails
//! to close them in time); only then is the exit status collected and the
//! terminal event emitted.

use super::line_buffer::LineBuffer;
use super::Invocation;
use crate::liveness::{LivenessAction, LivenessMonitor, LivenessThresholds};
use crate::mapping::LineMapper;
use crate::provider::emitter::RunEmitter;
use crate::provider::single_flight::FlightGuard;
use crate::textutil::single_line_preview;
use crate::types::{BackendKind, OutputFormat, TestGenEventKind};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Grace period for a killed child to close its pipes.
const KILL_GRACE: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 8 * 1024;
const PREVIEW_CHARS: usize = 200;
/// Bounds on the watchdog tick period.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub(super) struct RunJob {
    pub kind: BackendKind,
    pub mapper: Box<dyn LineMapper>,
    pub invocation: Invocation,
    pub detail: String,
    pub workspace_root: PathBuf,
    pub output_format: OutputFormat,
    pub announce_on_spawn: bool,
    pub thresholds: LivenessThresholds,
}

pub(super) async fn drive(
    mut job: RunJob,
    emitter: RunEmitter,
    mut cancel_rx: watch::Receiver<bool>,
    guard: FlightGuard,
) {
    let backend = job.kind.as_str();
    let task_id = emitter.task_id().to_string();

    if *cancel_rx.borrow() {
        tracing::debug!(%task_id, backend, "run cancelled before spawn");
        guard.release();
        emitter.complete(None);
        return;
    }

    let mut child = match spawn(&job) {
        Ok(child) => child,
        Err(err) => {
            tracing::error!(%task_id, backend, program = %job.invocation.program, error = %err, "spawn failed");
            guard.release();
            emitter.error(format!(
                "Failed to start {} ({}): {err}",
                job.kind.label(),
                job.invocation.program
            ));
            emitter.complete(None);
            return;
        }
    };
    tracing::info!(%task_id, backend, pid = ?child.id(), "backend started");

    if job.announce_on_spawn {
        emitter.emit(TestGenEventKind::Started {
            label: job.kind.label().to_string(),
            detail: job.detail.clone(),
        });
    }

    if let Some(mut stdin) = child.stdin.take() {
        let payload = job.invocation.stdin.take().unwrap_or_default();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                tracing::debug!(%task_id, error = %err, "stdin write failed");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let mut lines = LineBuffer::new();

    let thresholds = job.thresholds;
    let mut monitor = LivenessMonitor::new(thresholds, Instant::now().into_std());
    let check_interval = thresholds
        .check_interval
        .clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cancel_open = true;
    let mut kill_deadline: Option<Instant> = None;

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf) => match read {
                Ok(0) => stdout = None,
                Ok(n) => {
                    monitor.observe_output(Instant::now().into_std());
                    for line in lines.push(&out_buf[..n]) {
                        handle_line(&line, &mut job, &mut monitor, &emitter);
                    }
                }
                Err(err) => {
                    tracing::debug!(%task_id, error = %err, "stdout read failed");
                    stdout = None;
                }
            },
            read = read_chunk(&mut stderr, &mut err_buf) => match read {
                Ok(0) => stderr = None,
                Ok(n) => {
                    let now = Instant::now().into_std();
                    monitor.observe_output(now);
                    let text = String::from_utf8_lossy(&err_buf[..n]);
                    let text = text.trim();
                    if !text.is_empty() {
                        monitor.observe_visible_event(now);
                        emitter.error(text);
                    }
                }
                Err(err) => {
                    tracing::debug!(%task_id, error = %err, "stderr read failed");
                    stderr = None;
                }
            },
            _ = ticker.tick() => {
                for action in monitor.tick(Instant::now().into_std()) {
                    match action {
                        LivenessAction::Log(message) => {
                            emitter.info(message);
                        }
                        LivenessAction::Terminate(reason) => {
                            tracing::warn!(%task_id, backend, "auto-kill after silence");
                            emitter.info(reason);
                            kill(&mut child, &mut kill_deadline, &task_id);
                        }
                    }
                }
                if kill_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    tracing::warn!(%task_id, backend, "killed child kept its pipes open");
                    break;
                }
            },
            changed = cancel_rx.changed(), if cancel_open => {
                match changed {
                    Ok(()) if *cancel_rx.borrow() => {
                        tracing::info!(%task_id, backend, "run cancelled");
                        kill(&mut child, &mut kill_deadline, &task_id);
                    }
                    Ok(()) => {}
                    Err(_) => cancel_open = false,
                }
            },
        }
    }

    if let Some(tail) = lines.finish() {
        emitter.info(tail);
    }

    match child.wait().await {
        Ok(status) => {
            tracing::info!(%task_id, backend, %status, "backend exited");
            guard.release();
            emitter.complete(status.code());
        }
        Err(err) => {
            tracing::error!(%task_id, backend, error = %err, "wait failed");
            guard.release();
            emitter.error(format!("Failed to collect {} exit status: {err}", job.kind.label()));
            emitter.complete(None);
        }
    }
}

fn spawn(job: &RunJob) -> std::io::Result<Child> {
    let invocation = &job.invocation;
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(&job.workspace_root)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if invocation.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.spawn()
}

fn kill(child: &mut Child, deadline: &mut Option<Instant>, task_id: &str) {
    if deadline.is_some() {
        return;
    }
    if let Err(err) = child.start_kill() {
        tracing::debug!(%task_id, error = %err, "kill failed");
    }
    *deadline = Some(Instant::now() + KILL_GRACE);
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

fn handle_line(line: &str, job: &mut RunJob, monitor: &mut LivenessMonitor, emitter: &RunEmitter) {
    let now = Instant::now().into_std();
    if job.output_format == OutputFormat::Text {
        monitor.observe_parsed(None);
        monitor.observe_visible_event(now);
        emitter.info(line);
        return;
    }

    let value = match serde_json::from_str::<Value>(line) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(task_id = emitter.task_id(), error = %err, "non-JSON output line");
            monitor.observe_visible_event(now);
            emitter.warn(format!(
                "Unparseable output line: {}",
                single_line_preview(line, PREVIEW_CHARS)
            ));
            return;
        }
    };

    let outcome = job.mapper.map_value(value);
    let tag = outcome.tag.as_deref();
    tracing::debug!(task_id = emitter.task_id(), tag = tag.unwrap_or("-"), events = outcome.events.len(), "mapped line");
    match outcome.noise {
        Some(kind) => monitor.observe_ignored(kind, tag),
        None => monitor.observe_parsed(tag),
    }
    if !outcome.events.is_empty() {
        monitor.observe_visible_event(now);
    }
    for event in outcome.events {
        emitter.emit(event);
    }
}
