//! Claude Code CLI (`claude -p --output-format stream-json`).
//!
//! Tool invocations arrive as `tool_use` blocks inside assistant messages, so
//! file writes are emitted directly without correlation.

use super::{finish_summary, parse_tagged};
use crate::liveness::NoiseKind;
use crate::mapping::{count_lines, first_str, LineMapper, LineOutcome, MapContext};
use crate::process::ProcessBackend;
use crate::types::{BackendKind, OutputFormat, RunRequest, TestGenEventKind};
use serde::Deserialize;
use serde_json::Value;

/// Tools whose invocation means a file is about to be written.
const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];
/// Built-in shell tool, always allowed so generated tests can be executed.
const SHELL_TOOL: &str = "Bash";

#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeBackend;

impl ProcessBackend for ClaudeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Claude
    }

    fn default_command(&self) -> &'static str {
        "claude"
    }

    fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            request.output_format.flag_value().to_string(),
        ];
        // stream-json is rejected by the CLI in print mode without --verbose.
        if request.output_format == OutputFormat::StreamJson {
            args.push("--verbose".to_string());
        }
        args.push("--permission-mode".to_string());
        if request.allow_writes {
            args.push("acceptEdits".to_string());
        } else {
            args.push("default".to_string());
            args.push("--disallowedTools".to_string());
            args.push(WRITE_TOOLS.join(","));
        }
        args.push("--allowedTools".to_string());
        args.push(SHELL_TOOL.to_string());
        if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args
    }

    fn stdin_payload(&self, request: &RunRequest) -> Option<String> {
        // Long prompts overflow argv limits and shell quoting; stdin only.
        Some(request.prompt.clone())
    }

    fn new_mapper(&self, ctx: MapContext) -> Box<dyn LineMapper> {
        Box::new(ClaudeMapper { ctx })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeLine {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Assistant {
        message: AssistantMessage,
    },
    User {},
    StreamEvent {},
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {},
    RedactedThinking {},
    #[serde(other)]
    Other,
}

struct ClaudeMapper {
    ctx: MapContext,
}

impl ClaudeMapper {
    fn assistant(&self, tag: &str, message: AssistantMessage) -> LineOutcome {
        let blocks = match message.content {
            MessageContent::Text(text) => {
                return LineOutcome::text(tag, Some(text).filter(|t| !t.trim().is_empty()));
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut text = String::new();
        let mut writes = Vec::new();
        let mut thinking_only = !blocks.is_empty();
        for block in blocks {
            match block {
                ContentBlock::Text { text: chunk } => {
                    thinking_only = false;
                    text.push_str(&chunk);
                }
                ContentBlock::ToolUse { name, input } => {
                    thinking_only = false;
                    if let Some(event) = self.tool_use(&name, &input) {
                        writes.push(event);
                    }
                }
                ContentBlock::Thinking {} | ContentBlock::RedactedThinking {} => {}
                ContentBlock::Other => thinking_only = false,
            }
        }

        if thinking_only {
            return LineOutcome::noise(tag, NoiseKind::Reasoning);
        }
        let mut events = Vec::new();
        if !text.trim().is_empty() {
            events.push(TestGenEventKind::info(text));
        }
        events.extend(writes);
        LineOutcome::emit_all(tag, events)
    }

    fn tool_use(&self, name: &str, input: &Value) -> Option<TestGenEventKind> {
        if !WRITE_TOOLS.contains(&name) {
            return None;
        }
        let path = first_str(input, &["file_path", "notebook_path", "path"])?;
        let lines = match name {
            "Write" => input.get("content").and_then(Value::as_str).map(count_lines),
            _ => None,
        };
        Some(self.ctx.file_write(path, lines))
    }
}

impl LineMapper for ClaudeMapper {
    fn map_value(&mut self, value: Value) -> LineOutcome {
        let (tag, line) = match parse_tagged::<ClaudeLine>(value) {
            Ok(parsed) => parsed,
            Err(outcome) => return outcome,
        };
        match line {
            ClaudeLine::System { subtype, model } => {
                let message = match (subtype.as_deref(), model) {
                    (Some("init"), Some(model)) => format!("Session initialized (model: {model})"),
                    (Some("init"), None) => "Session initialized".to_string(),
                    (Some(other), _) => format!("system: {other}"),
                    (None, _) => "system notice".to_string(),
                };
                LineOutcome::emit(&tag, TestGenEventKind::info(message))
            }
            ClaudeLine::Assistant { message } => self.assistant(&tag, message),
            ClaudeLine::User {} => LineOutcome::noise(&tag, NoiseKind::Echo),
            ClaudeLine::StreamEvent {} => LineOutcome::noise(&tag, NoiseKind::Other),
            ClaudeLine::Result {
                subtype,
                is_error,
                result,
                duration_ms,
                num_turns,
            } => {
                let event = if is_error {
                    let detail = result
                        .or(subtype)
                        .unwrap_or_else(|| "unknown error".to_string());
                    TestGenEventKind::error(format!("Claude reported an error: {detail}"))
                } else {
                    TestGenEventKind::info(finish_summary(
                        subtype.as_deref().unwrap_or("success"),
                        duration_ms,
                        num_turns,
                    ))
                };
                LineOutcome::emit(&tag, event)
            }
            ClaudeLine::Unknown => LineOutcome::unknown(Some(&tag)),
        }
    }
}
