//! End-to-end runs of the process adapters against fake backend CLIs.
//!
//! Each test writes a small `/bin/sh` script that prints a canned line
//! protocol and points the request's `command` at it.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testgen::process::env::child_env_overrides;
use testgen::process::{ClaudeProvider, CodexProvider, GeminiProvider};
use testgen::provider::{run_to_completion, CompletionOptions, TestGenProvider};
use testgen::types::{LogLevel, OutputFormat, RunRequest, TestGenEvent, TestGenEventKind};

static COUNTER: AtomicU64 = AtomicU64::new(0);

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(prefix: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "testgen-it-{prefix}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(root.join("bin")).expect("create workspace");
        Self { root }
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn script(&self, name: &str, body: &str) -> String {
        let path = self.root.join("bin").join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = fs::metadata(&path).expect("script metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod script");
        path.to_string_lossy().into_owned()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<TestGenEvent>>>);

impl Events {
    fn request(&self, task_id: &str, workspace: &Workspace, command: String) -> RunRequest {
        let events = Arc::clone(&self.0);
        let mut request = RunRequest::new(
            task_id,
            workspace.path(),
            "Write tests for src/a.ts",
            Arc::new(move |event: TestGenEvent| events.lock().unwrap().push(event)),
        );
        request.command = Some(command);
        request
    }

    fn kinds(&self) -> Vec<TestGenEventKind> {
        self.0.lock().unwrap().iter().map(|e| e.kind.clone()).collect()
    }

    fn messages(&self, level: LogLevel) -> Vec<String> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                TestGenEventKind::Log { level: l, message } if l == level => Some(message),
                _ => None,
            })
            .collect()
    }

    fn completions(&self) -> Vec<Option<i32>> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                TestGenEventKind::Completed { exit_code } => Some(exit_code),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_completion(&self) {
        for _ in 0..1000 {
            if !self.completions().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run never completed: {:?}", self.kinds());
    }
}

async fn run(provider: &dyn TestGenProvider, request: RunRequest) -> Option<i32> {
    let options = CompletionOptions::default().with_timeout(Duration::from_secs(20));
    run_to_completion(provider, request, options).await
}

#[tokio::test]
async fn claude_stream_is_mapped_and_prompt_arrives_on_stdin() {
    let ws = Workspace::new("claude");
    let test_file = ws.path().join("src/a.test.ts");
    let body = format!(
        r#"cat > "{prompt}"
cat <<'EOF'
{{"type":"system","subtype":"init","session_id":"s1","model":"sonnet"}}
{{"type":"assistant","message":{{"content":[{{"type":"text","text":"Writing tests"}}]}}}}
{{"type":"assistant","message":{{"content":[{{"type":"tool_use","id":"tu_1","name":"Write","input":{{"file_path":"{file}","content":"a\nb\n"}}}}]}}}}
{{"type":"result","subtype":"success","is_error":false,"duration_ms":1200,"num_turns":1}}
EOF"#,
        prompt = ws.path().join("prompt.txt").display(),
        file = test_file.display(),
    );
    let command = ws.script("claude", &body);
    let events = Events::default();

    let code = run(&ClaudeProvider::default(), events.request("t1", &ws, command)).await;

    assert_eq!(code, Some(0));
    let kinds = events.kinds();
    assert!(matches!(
        &kinds[0],
        TestGenEventKind::Started { label, .. } if label == "Claude Code"
    ));
    assert!(kinds.contains(&TestGenEventKind::file_write("src/a.test.ts", Some(2))));
    assert!(events.messages(LogLevel::Info).contains(&"Writing tests".to_string()));
    assert_eq!(events.completions(), vec![Some(0)]);
    assert!(kinds.last().is_some_and(TestGenEventKind::is_completed));
    assert_eq!(
        fs::read_to_string(ws.path().join("prompt.txt")).unwrap(),
        "Write tests for src/a.ts"
    );
}

#[tokio::test]
async fn a_line_split_across_writes_is_parsed_once() {
    let ws = Workspace::new("chunked");
    let command = ws.script(
        "claude",
        r#"cat > /dev/null
printf '{"type":"assistant","message":{"content":[{"type":"text",'
sleep 0.2
printf '"text":"joined"}]}}\n'"#,
    );
    let events = Events::default();

    let code = run(&ClaudeProvider::default(), events.request("t1", &ws, command)).await;

    assert_eq!(code, Some(0));
    assert_eq!(
        events
            .messages(LogLevel::Info)
            .iter()
            .filter(|m| *m == "joined")
            .count(),
        1
    );
    assert!(events.messages(LogLevel::Warn).is_empty());
}

#[tokio::test]
async fn unterminated_last_line_is_flushed_as_info() {
    let ws = Workspace::new("tail");
    let command = ws.script("claude", "cat > /dev/null\nprintf 'partial tail'");
    let events = Events::default();

    let code = run(&ClaudeProvider::default(), events.request("t1", &ws, command)).await;

    assert_eq!(code, Some(0));
    assert_eq!(events.messages(LogLevel::Info).last().map(String::as_str), Some("partial tail"));
    assert!(events.messages(LogLevel::Warn).is_empty());
    let kinds = events.kinds();
    assert!(matches!(
        &kinds[kinds.len() - 2],
        TestGenEventKind::Log { message, .. } if message == "partial tail"
    ));
}

#[tokio::test]
async fn stderr_and_exit_code_are_reported() {
    let ws = Workspace::new("stderr");
    let command = ws.script("claude", "cat > /dev/null\necho 'auth expired' >&2\nexit 3");
    let events = Events::default();

    let code = run(&ClaudeProvider::default(), events.request("t1", &ws, command)).await;

    assert_eq!(code, Some(3));
    assert_eq!(events.messages(LogLevel::Error), vec!["auth expired".to_string()]);
}

#[tokio::test]
async fn non_json_lines_degrade_to_warnings() {
    let ws = Workspace::new("garbage");
    let command = ws.script("claude", "cat > /dev/null\necho 'Loading plugins...'");
    let events = Events::default();

    let code = run(&ClaudeProvider::default(), events.request("t1", &ws, command)).await;

    assert_eq!(code, Some(0));
    assert_eq!(
        events.messages(LogLevel::Warn),
        vec!["Unparseable output line: Loading plugins...".to_string()]
    );
}

#[tokio::test]
async fn missing_binary_completes_without_exit_code() {
    let ws = Workspace::new("missing");
    let events = Events::default();
    let request = events.request("t1", &ws, ws.path().join("bin/nope").display().to_string());

    let code = run(&CodexProvider::default(), request).await;

    assert_eq!(code, None);
    assert!(events.messages(LogLevel::Error)[0].starts_with("Failed to start Codex CLI"));
    assert_eq!(events.completions(), vec![None]);
}

#[tokio::test]
async fn codex_announces_its_own_start_and_reports_file_changes() {
    let ws = Workspace::new("codex");
    let body = format!(
        r#"cat > /dev/null
cat <<'EOF'
{{"type":"thread.started","thread_id":"th_1"}}
{{"type":"item.completed","item":{{"id":"fc_1","type":"file_change","status":"completed","changes":[{{"path":"{file}","kind":"add"}}]}}}}
{{"type":"turn.completed","usage":{{"input_tokens":10,"cached_input_tokens":0,"output_tokens":5}}}}
EOF"#,
        file = ws.path().join("tests/parser.rs").display(),
    );
    let command = ws.script("codex", &body);
    let events = Events::default();

    let code = run(&CodexProvider::default(), events.request("t1", &ws, command)).await;

    assert_eq!(code, Some(0));
    let started = events
        .kinds()
        .into_iter()
        .filter(|kind| matches!(kind, TestGenEventKind::Started { .. }))
        .collect::<Vec<_>>();
    assert_eq!(
        started,
        vec![TestGenEventKind::Started {
            label: "Codex CLI".into(),
            detail: "thread th_1".into()
        }]
    );
    assert!(events
        .kinds()
        .contains(&TestGenEventKind::file_write("tests/parser.rs", None)));
}

#[tokio::test]
async fn text_format_forwards_lines_verbatim() {
    let ws = Workspace::new("gemini-text");
    let command = ws.script("gemini", "echo 'Reading files'\necho '{\"not\":\"parsed\"}'");
    let events = Events::default();
    let mut request = events.request("t1", &ws, command);
    request.output_format = OutputFormat::Text;

    let code = run(&GeminiProvider::default(), request).await;

    assert_eq!(code, Some(0));
    assert!(matches!(
        &events.kinds()[0],
        TestGenEventKind::Started { label, .. } if label == "Gemini CLI"
    ));
    assert_eq!(
        events.messages(LogLevel::Info),
        vec!["Reading files".to_string(), "{\"not\":\"parsed\"}".to_string()]
    );
}

#[tokio::test]
async fn ide_host_overrides_reach_the_child() {
    let ws = Workspace::new("ide-env");
    let command = ws.script(
        "gemini",
        r#"echo "editor=$EDITOR visual=$VISUAL git_editor=$GIT_EDITOR"
echo "pager=$PAGER git_pager=$GIT_PAGER""#,
    );
    let events = Events::default();
    let mut request = events.request("t1", &ws, command);
    request.output_format = OutputFormat::Text;
    let overrides = child_env_overrides(|key| (key == "TERM_PROGRAM").then(|| "vscode".to_string()));
    let provider = GeminiProvider::default().with_child_env(overrides);

    let code = run(&provider, request).await;

    assert_eq!(code, Some(0));
    assert_eq!(
        events.messages(LogLevel::Info),
        vec![
            "editor=true visual=true git_editor=true".to_string(),
            "pager=cat git_pager=cat".to_string()
        ]
    );
}

#[tokio::test]
async fn a_second_run_supersedes_the_first() {
    let ws = Workspace::new("supersede");
    let slow = ws.script("slow", "exec sleep 30");
    let fast = ws.script("fast", "cat > /dev/null");
    let provider = ClaudeProvider::default();
    let first = Events::default();
    let second = Events::default();

    let _first_task = provider.run(first.request("t1", &ws, slow));
    tokio::time::sleep(Duration::from_millis(200)).await;
    let code = run(&provider, second.request("t2", &ws, fast)).await;
    first.wait_for_completion().await;

    assert_eq!(code, Some(0));
    assert_eq!(first.completions(), vec![None]);
    assert!(second
        .messages(LogLevel::Warn)
        .contains(&"Superseded still-running task t1".to_string()));
    assert!(provider.active_task_id().is_none());
}

#[tokio::test]
async fn dispose_is_idempotent_and_yields_one_completion() {
    let ws = Workspace::new("dispose");
    let slow = ws.script("slow", "exec sleep 30");
    let provider = ClaudeProvider::default();
    let events = Events::default();

    let task = provider.run(events.request("t1", &ws, slow));
    tokio::time::sleep(Duration::from_millis(200)).await;
    task.dispose();
    task.dispose();
    events.wait_for_completion().await;
    task.dispose();

    assert!(task.is_disposed());
    assert_eq!(events.completions(), vec![None]);
    assert!(provider.active_task_id().is_none());
}
