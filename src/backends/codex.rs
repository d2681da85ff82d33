//! Codex CLI (`codex exec --json`).
//!
//! Codex reports work as items that move through `item.started`,
//! `item.updated`, and `item.completed`. File changes may be announced on
//! start and completed later, so their paths go through a
//! [`ToolCallRegistry`].

use super::parse_tagged;
use crate::liveness::NoiseKind;
use crate::mapping::{LineMapper, LineOutcome, MapContext, ToolCallRegistry};
use crate::process::ProcessBackend;
use crate::types::{BackendKind, OutputFormat, RunRequest, TestGenEventKind};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct CodexBackend;

impl ProcessBackend for CodexBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Codex
    }

    fn default_command(&self) -> &'static str {
        "codex"
    }

    fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if request.output_format != OutputFormat::Text {
            args.push("--json".to_string());
        }
        if request.allow_writes {
            args.push("--full-auto".to_string());
        } else {
            args.push("--sandbox".to_string());
            args.push("read-only".to_string());
        }
        args.push("--skip-git-repo-check".to_string());
        if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
            args.push("-m".to_string());
            args.push(model.to_string());
        }
        // `-` makes codex read the prompt from stdin.
        args.push("-".to_string());
        args
    }

    fn stdin_payload(&self, request: &RunRequest) -> Option<String> {
        Some(request.prompt.clone())
    }

    fn protocol_announces_start(&self, format: OutputFormat) -> bool {
        format != OutputFormat::Text
    }

    fn new_mapper(&self, ctx: MapContext) -> Box<dyn LineMapper> {
        Box::new(CodexMapper {
            ctx,
            registry: ToolCallRegistry::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CodexLine {
    #[serde(rename = "thread.started")]
    ThreadStarted {
        #[serde(default)]
        thread_id: Option<String>,
    },
    #[serde(rename = "turn.started")]
    TurnStarted {},
    #[serde(rename = "item.started")]
    ItemStarted { item: CodexItem },
    #[serde(rename = "item.updated")]
    ItemUpdated { item: CodexItem },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<Usage>,
    },
    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CodexItem {
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    Reasoning {},
    CommandExecution {},
    FileChange {
        #[serde(default)]
        id: String,
        #[serde(default)]
        changes: Vec<FileChange>,
        #[serde(default)]
        status: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct FileChange {
    path: String,
    #[serde(default)]
    kind: Option<String>,
}

impl FileChange {
    fn is_delete(&self) -> bool {
        self.kind.as_deref() == Some("delete")
    }
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cached_input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Started,
    Updated,
    Completed,
}

struct CodexMapper {
    ctx: MapContext,
    registry: ToolCallRegistry,
}

impl CodexMapper {
    fn item(&mut self, tag: &str, phase: Phase, item: CodexItem) -> LineOutcome {
        match item {
            CodexItem::AgentMessage { text } if phase == Phase::Completed => {
                LineOutcome::text(tag, Some(text).filter(|t| !t.trim().is_empty()))
            }
            CodexItem::AgentMessage { .. } => LineOutcome::silent(tag),
            CodexItem::Reasoning {} => LineOutcome::noise(tag, NoiseKind::Reasoning),
            CodexItem::CommandExecution {} | CodexItem::Other => {
                LineOutcome::noise(tag, NoiseKind::Other)
            }
            CodexItem::FileChange {
                id,
                changes,
                status,
            } => self.file_change(tag, phase, &id, changes, status.as_deref()),
            CodexItem::Error { message } if phase == Phase::Completed => {
                LineOutcome::emit(tag, TestGenEventKind::error(message))
            }
            CodexItem::Error { .. } => LineOutcome::silent(tag),
        }
    }

    fn file_change(
        &mut self,
        tag: &str,
        phase: Phase,
        id: &str,
        changes: Vec<FileChange>,
        status: Option<&str>,
    ) -> LineOutcome {
        let announced: Vec<String> = changes
            .iter()
            .filter(|change| !change.is_delete())
            .map(|change| change.path.clone())
            .collect();

        if phase != Phase::Completed {
            if !id.is_empty() && !self.registry.contains(id) {
                for path in announced {
                    self.registry.record(id, path);
                }
            }
            return LineOutcome::silent(tag);
        }

        let recorded = if id.is_empty() {
            Vec::new()
        } else {
            self.registry.resolve(id)
        };
        let paths = if announced.is_empty() && changes.is_empty() {
            recorded
        } else {
            announced
        };

        if status == Some("failed") {
            return LineOutcome::emit(
                tag,
                TestGenEventKind::warn(format!("File change failed: {}", paths.join(", "))),
            );
        }
        let events = paths
            .iter()
            .map(|path| self.ctx.file_write(path, None))
            .collect();
        LineOutcome::emit_all(tag, events)
    }
}

impl LineMapper for CodexMapper {
    fn map_value(&mut self, value: Value) -> LineOutcome {
        let (tag, line) = match parse_tagged::<CodexLine>(value) {
            Ok(parsed) => parsed,
            Err(outcome) => return outcome,
        };
        match line {
            CodexLine::ThreadStarted { thread_id } => {
                let detail = match thread_id {
                    Some(id) => format!("thread {id}"),
                    None => "thread started".to_string(),
                };
                LineOutcome::emit(
                    &tag,
                    TestGenEventKind::Started {
                        label: BackendKind::Codex.label().to_string(),
                        detail,
                    },
                )
            }
            CodexLine::TurnStarted {} => LineOutcome::noise(&tag, NoiseKind::Other),
            CodexLine::ItemStarted { item } => self.item(&tag, Phase::Started, item),
            CodexLine::ItemUpdated { item } => self.item(&tag, Phase::Updated, item),
            CodexLine::ItemCompleted { item } => self.item(&tag, Phase::Completed, item),
            CodexLine::TurnCompleted { usage } => {
                let message = match usage {
                    Some(usage) => format!(
                        "Turn completed (tokens: {} in, {} cached, {} out)",
                        usage.input_tokens, usage.cached_input_tokens, usage.output_tokens
                    ),
                    None => "Turn completed".to_string(),
                };
                LineOutcome::emit(&tag, TestGenEventKind::info(message))
            }
            CodexLine::TurnFailed { error } => {
                let detail = error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "unknown error".to_string());
                LineOutcome::emit(&tag, TestGenEventKind::error(format!("Turn failed: {detail}")))
            }
            CodexLine::Error { message } => LineOutcome::emit(
                &tag,
                TestGenEventKind::error(message.unwrap_or_else(|| "Codex error".to_string())),
            ),
            CodexLine::Unknown => LineOutcome::unknown(Some(&tag)),
        }
    }
}
