//! Provider facade shared by every backend.
//!
//! A provider is a long-lived, per-backend object. Each [`TestGenProvider::run`]
//! call starts one task in the background and returns immediately with a
//! [`RunningTask`] handle; progress and the terminal result flow through the
//! request's sink.

pub mod completion;
pub mod emitter;
pub mod single_flight;

pub use completion::{run_to_completion, CompletionOptions};
pub use single_flight::RunningTask;

use crate::config::Config;
use crate::process::{ClaudeProvider, CodexProvider, CursorProvider, GeminiProvider};
use crate::remote::DevinProvider;
use crate::types::{BackendKind, RunRequest};

pub trait TestGenProvider: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Start `request`, superseding any run still active on this provider.
    ///
    /// Must be called from within a Tokio runtime.
    fn run(&self, request: RunRequest) -> RunningTask;
}

/// Build the provider for `kind` from configuration.
pub fn provider_for(kind: BackendKind, config: &Config) -> Box<dyn TestGenProvider> {
    let command = config.commands.for_backend(kind);
    let liveness = config.liveness.thresholds();
    match kind {
        BackendKind::Claude => Box::new(
            ClaudeProvider::default()
                .with_thresholds(liveness)
                .with_default_command(command),
        ),
        BackendKind::Codex => Box::new(
            CodexProvider::default()
                .with_thresholds(liveness)
                .with_default_command(command),
        ),
        BackendKind::Gemini => Box::new(
            GeminiProvider::default()
                .with_thresholds(liveness)
                .with_default_command(command),
        ),
        BackendKind::Cursor => Box::new(
            CursorProvider::default()
                .with_thresholds(liveness)
                .with_default_command(command),
        ),
        BackendKind::Devin => Box::new(DevinProvider::from_config(&config.devin)),
    }
}
