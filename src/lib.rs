//! testgen: run coding-agent backends to generate tests.
//!
//! Five backends sit behind one [`provider::TestGenProvider`] facade: four
//! local CLIs (Claude Code, Codex, Gemini, Cursor) run as child processes
//! whose line protocols are mapped onto a common event stream, and Devin,
//! driven as a remote session over HTTP polling. Every run reports progress
//! through its sink and ends with exactly one `Completed` event.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use testgen::config::load_config;
//! use testgen::provider::{provider_for, run_to_completion, CompletionOptions};
//! use testgen::types::{BackendKind, EventSink, RunRequest};
//!
//! # async fn example() {
//! let config = load_config(None).unwrap();
//! let provider = provider_for(BackendKind::Claude, &config);
//! let sink: EventSink = Arc::new(|event| println!("{event:?}"));
//! let request = RunRequest::new("task-1", ".", "Write unit tests for src/parser.rs", sink);
//! let exit_code = run_to_completion(provider.as_ref(), request, CompletionOptions::default()).await;
//! println!("{exit_code:?}");
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod liveness;
pub mod mapping;
pub mod process;
pub mod provider;
pub mod remote;
#[cfg(test)]
pub mod testsupport;
pub mod textutil;
pub mod types;
