//! CLI argument parsing via clap, plus plain-text event rendering.

use clap::Parser;
use std::path::PathBuf;
use testgen::error::RunError;
use testgen::types::{BackendKind, LogLevel, OutputFormat, TestGenEvent, TestGenEventKind};

const ENVIRONMENT_HELP: &str = "Environment:
  TESTGEN_LOG                 diagnostic log filter (default: warn)
  TESTGEN_DEVIN_API_KEY       Devin API key (DEVIN_API_KEY also accepted)
  TESTGEN_DEVIN_BASE_URL      Devin API base URL
  TESTGEN_<BACKEND>_COMMAND   binary override for claude, codex, gemini, or cursor
  TESTGEN_AUTO_KILL_SECS      silence limit before a CLI backend is killed";

/// Run a coding-agent backend to generate tests for a workspace.
#[derive(Debug, Parser)]
#[command(name = "testgen", version, after_help = ENVIRONMENT_HELP)]
pub struct Args {
    /// Backend to run: claude, codex, gemini, cursor, or devin.
    pub backend: BackendKind,

    /// Workspace root; the agent runs here and file paths are reported relative to it.
    #[arg(short = 'w', long = "workspace", default_value = ".")]
    pub workspace: PathBuf,

    /// Prompt text.
    #[arg(short = 'p', long = "prompt", conflicts_with = "prompt_file")]
    pub prompt: Option<String>,

    /// Read the prompt from a file (`-` for stdin).
    #[arg(long = "prompt-file", value_name = "PATH")]
    pub prompt_file: Option<PathBuf>,

    /// Model passed through to the backend.
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Output format requested from the backend CLI.
    #[arg(long = "format", default_value = "stream-json")]
    pub format: OutputFormat,

    /// Let the agent edit files without asking.
    #[arg(long = "allow-writes")]
    pub allow_writes: bool,

    /// Stop the run after this many seconds.
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Override the backend binary.
    #[arg(long = "command", value_name = "BIN")]
    pub command: Option<String>,

    /// Path to config file (default: ./testgen.toml or ~/.config/testgen/testgen.toml).
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// Task id attached to every event.
    #[arg(long = "task-id")]
    pub task_id: Option<String>,

    /// Print events as JSON lines.
    #[arg(long = "json")]
    pub json: bool,
}

impl Args {
    /// Resolve the prompt from `--prompt`, `--prompt-file`, or stdin.
    pub fn read_prompt(&self) -> Result<String, RunError> {
        let prompt = match (&self.prompt, &self.prompt_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) if path.as_os_str() == "-" => read_stdin()?,
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => read_stdin()?,
        };
        if prompt.trim().is_empty() {
            return Err(RunError::EmptyPrompt);
        }
        Ok(prompt)
    }
}

fn read_stdin() -> Result<String, RunError> {
    use std::io::Read;
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;
    Ok(text)
}

/// One human-readable line per event.
pub fn render_event(event: &TestGenEvent) -> String {
    match &event.kind {
        TestGenEventKind::Started { label, detail } if detail.is_empty() => {
            format!("started {label}")
        }
        TestGenEventKind::Started { label, detail } => format!("started {label}: {detail}"),
        TestGenEventKind::Log { level, message } => match level {
            LogLevel::Info => message.clone(),
            LogLevel::Warn => format!("warning: {message}"),
            LogLevel::Error => format!("error: {message}"),
        },
        TestGenEventKind::FileWrite {
            path,
            lines_created: Some(lines),
        } => format!("wrote {path} (+{lines} lines)"),
        TestGenEventKind::FileWrite { path, .. } => format!("wrote {path}"),
        TestGenEventKind::Completed {
            exit_code: Some(code),
        } => format!("completed with exit code {code}"),
        TestGenEventKind::Completed { exit_code: None } => "completed without an exit code".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_environment_variables() {
        use clap::CommandFactory;
        let help = Args::command().render_help().to_string();
        assert!(help.contains("TESTGEN_DEVIN_API_KEY"));
        assert!(help.contains("TESTGEN_AUTO_KILL_SECS"));
    }

    #[test]
    fn backend_and_defaults_parse() {
        let args = Args::parse_from(["testgen", "codex", "--prompt", "cover foo"]);
        assert_eq!(args.backend, BackendKind::Codex);
        assert_eq!(args.format, OutputFormat::StreamJson);
        assert_eq!(args.workspace, PathBuf::from("."));
        assert!(!args.allow_writes);
        assert_eq!(args.read_prompt().unwrap(), "cover foo");
    }

    #[test]
    fn format_and_overrides_parse() {
        let args = Args::parse_from([
            "testgen",
            "gemini",
            "--format",
            "json",
            "--allow-writes",
            "--timeout",
            "90",
            "--command",
            "/opt/gemini",
            "-m",
            "gemini-2.5-pro",
            "--json",
        ]);
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.allow_writes);
        assert_eq!(args.timeout, Some(90));
        assert_eq!(args.command.as_deref(), Some("/opt/gemini"));
        assert_eq!(args.model.as_deref(), Some("gemini-2.5-pro"));
        assert!(args.json);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Args::try_parse_from(["testgen", "copilot", "--prompt", "x"]).is_err());
    }

    #[test]
    fn prompt_and_prompt_file_conflict() {
        assert!(
            Args::try_parse_from(["testgen", "claude", "--prompt", "x", "--prompt-file", "p.md"])
                .is_err()
        );
    }

    #[test]
    fn blank_prompt_is_an_error() {
        let args = Args::parse_from(["testgen", "claude", "--prompt", "  \n"]);
        assert!(matches!(args.read_prompt(), Err(RunError::EmptyPrompt)));
    }

    #[test]
    fn events_render_as_single_lines() {
        let event = |kind| TestGenEvent::new("t", kind);
        assert_eq!(
            render_event(&event(TestGenEventKind::file_write("src/a.test.ts", Some(12)))),
            "wrote src/a.test.ts (+12 lines)"
        );
        assert_eq!(
            render_event(&event(TestGenEventKind::warn("slow"))),
            "warning: slow"
        );
        assert_eq!(
            render_event(&event(TestGenEventKind::Completed { exit_code: None })),
            "completed without an exit code"
        );
    }
}
