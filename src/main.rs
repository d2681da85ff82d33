//! CLI entry point for testgen.

mod cli;

use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use testgen::config::load_config_with_source;
use testgen::provider::{provider_for, run_to_completion, CompletionOptions};
use testgen::types::{EventSink, RunRequest, TestGenEvent};
use tracing_subscriber::EnvFilter;

/// Exit status when the run produced no exit code (timeout, transport failure).
const NO_EXIT_CODE: i32 = 124;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TESTGEN_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let loaded = match load_config_with_source(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(source = ?loaded.source, "config loaded");

    let prompt = match args.read_prompt() {
        Ok(prompt) => prompt,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let workspace = std::fs::canonicalize(&args.workspace).unwrap_or_else(|_| args.workspace.clone());
    let task_id = args
        .task_id
        .clone()
        .unwrap_or_else(|| format!("{}-{}", args.backend, std::process::id()));
    let sink = if args.json { json_sink() } else { text_sink() };

    let mut request = RunRequest::new(task_id, workspace, prompt, sink);
    request.command = args.command.clone();
    request.model = args.model.clone();
    request.output_format = args.format;
    request.allow_writes = args.allow_writes;

    let provider = provider_for(args.backend, &loaded.config);
    let mut options = CompletionOptions::default().on_task(|task| {
        let task = task.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                task.dispose();
            }
        });
    });
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let exit_code = run_to_completion(provider.as_ref(), request, options).await;
    std::process::exit(exit_code.unwrap_or(NO_EXIT_CODE));
}

fn text_sink() -> EventSink {
    Arc::new(|event: TestGenEvent| {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", cli::render_event(&event));
    })
}

fn json_sink() -> EventSink {
    Arc::new(|event: TestGenEvent| {
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
    })
}
