//! Shared test fixtures for adapter/provider test modules.
//!
//! Keeps temp-dir, fake-backend-script, and event-collection helpers in one
//! place so each test module doesn't rebuild them.

use crate::types::{EventSink, LogLevel, TestGenEvent, TestGenEventKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!(
            "testgen-{prefix}-{}-{millis}-{suffix}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    /// Root directory path for this fixture.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build a child path under the fixture root.
    pub fn child(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.child(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }

    /// Write an executable `/bin/sh` script standing in for a backend CLI.
    #[cfg(unix)]
    pub fn write_script(&self, relative: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.write_text(relative, &format!("#!/bin/sh\n{body}\n"));
        let mut perms = fs::metadata(&path)
            .expect("script metadata")
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("failed to mark script executable");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Thread-safe collector of delivered events.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TestGenEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that appends every event to this log.
    pub fn sink(&self) -> EventSink {
        let events = Arc::clone(&self.events);
        Arc::new(move |event| {
            events.lock().expect("event log lock").push(event);
        })
    }

    pub fn events(&self) -> Vec<TestGenEvent> {
        self.events.lock().expect("event log lock").clone()
    }

    pub fn kinds(&self) -> Vec<TestGenEventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }

    /// Messages of every `Log` event at `level`.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                TestGenEventKind::Log { level: l, message } if l == level => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<Option<i32>> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                TestGenEventKind::Completed { exit_code } => Some(exit_code),
                _ => None,
            })
            .collect()
    }

    pub fn file_writes(&self) -> Vec<(String, Option<u64>)> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                TestGenEventKind::FileWrite {
                    path,
                    lines_created,
                } => Some((path, lines_created)),
                _ => None,
            })
            .collect()
    }

    /// Assert the stream ends with exactly one `Completed` and return its code.
    pub fn assert_single_terminal(&self) -> Option<i32> {
        let kinds = self.kinds();
        let completions = self.completions();
        assert_eq!(completions.len(), 1, "expected one completion, got {kinds:?}");
        assert!(
            kinds.last().is_some_and(TestGenEventKind::is_completed),
            "events after completion: {kinds:?}"
        );
        completions[0]
    }

    /// Poll until a `Completed` event shows up or `timeout` elapses.
    pub async fn wait_for_completion(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !self.completions().is_empty() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        !self.completions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_fixture_writes_and_resolves_paths() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_text("nested/file.txt", "hello");
        assert_eq!(fs::read_to_string(file).unwrap(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn script_fixture_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let fixture = TestTempDir::new("script");
        let script = fixture.write_script("bin/fake", "echo hi");
        let mode = fs::metadata(script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn event_log_filters_by_level() {
        let log = EventLog::new();
        let sink = log.sink();
        sink(TestGenEvent::new("t", TestGenEventKind::warn("w1")));
        sink(TestGenEvent::new("t", TestGenEventKind::info("i1")));
        sink(TestGenEvent::new("t", TestGenEventKind::Completed { exit_code: Some(0) }));
        assert_eq!(log.messages(LogLevel::Warn), vec!["w1".to_string()]);
        assert_eq!(log.assert_single_terminal(), Some(0));
    }
}
