//! Gemini CLI (`gemini --output-format stream-json`).

use super::parse_tagged;
use crate::liveness::NoiseKind;
use crate::mapping::{
    count_lines, extract_text, first_str, is_write_like, LineMapper, LineOutcome, MapContext,
};
use crate::process::ProcessBackend;
use crate::types::{BackendKind, OutputFormat, RunRequest, TestGenEventKind};
use serde::Deserialize;
use serde_json::Value;

const SHELL_TOOL: &str = "run_shell_command";

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiBackend;

impl ProcessBackend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn default_command(&self) -> &'static str {
        "gemini"
    }

    fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = vec![
            "--output-format".to_string(),
            request.output_format.flag_value().to_string(),
            "--approval-mode".to_string(),
            if request.allow_writes {
                "auto_edit"
            } else {
                "default"
            }
            .to_string(),
            "--allowed-tools".to_string(),
            SHELL_TOOL.to_string(),
        ];
        if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
            args.push("-m".to_string());
            args.push(model.to_string());
        }
        args.push("--prompt".to_string());
        args.push(request.prompt.clone());
        args
    }

    fn stdin_payload(&self, _request: &RunRequest) -> Option<String> {
        None
    }

    fn protocol_announces_start(&self, format: OutputFormat) -> bool {
        format == OutputFormat::StreamJson
    }

    fn new_mapper(&self, ctx: MapContext) -> Box<dyn LineMapper> {
        Box::new(GeminiMapper { ctx })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GeminiLine {
    Init {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Message {
        #[serde(default)]
        role: Option<String>,
        #[serde(flatten)]
        body: Value,
    },
    ToolUse {
        #[serde(default)]
        tool_name: String,
        #[serde(default)]
        parameters: Value,
    },
    ToolResult {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    Error {
        #[serde(default)]
        severity: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        stats: Option<Stats>,
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Stats {
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    tool_calls: Option<u64>,
}

struct GeminiMapper {
    ctx: MapContext,
}

impl GeminiMapper {
    fn tool_use(&self, tag: &str, name: &str, parameters: &Value) -> LineOutcome {
        if !(is_write_like(name) || name.eq_ignore_ascii_case("replace")) {
            return LineOutcome::noise(tag, NoiseKind::Other);
        }
        let Some(path) = first_str(parameters, &["file_path", "absolute_path", "path"]) else {
            return LineOutcome::malformed(tag, format!("{name} call without a file path"));
        };
        let lines = parameters
            .get("content")
            .and_then(Value::as_str)
            .map(count_lines);
        LineOutcome::emit(tag, self.ctx.file_write(path, lines))
    }
}

impl LineMapper for GeminiMapper {
    fn map_value(&mut self, value: Value) -> LineOutcome {
        // `--output-format json` prints one untagged summary object.
        if value.get("type").is_none() {
            if let Some(response) = value.get("response").and_then(Value::as_str) {
                return LineOutcome::text("response", Some(response.to_string()));
            }
        }
        let (tag, line) = match parse_tagged::<GeminiLine>(value) {
            Ok(parsed) => parsed,
            Err(outcome) => return outcome,
        };
        match line {
            GeminiLine::Init { model, session_id } => {
                let mut detail = Vec::new();
                if let Some(model) = model {
                    detail.push(format!("model {model}"));
                }
                if let Some(session) = session_id {
                    detail.push(format!("session {session}"));
                }
                LineOutcome::emit(
                    &tag,
                    TestGenEventKind::Started {
                        label: BackendKind::Gemini.label().to_string(),
                        detail: detail.join(", "),
                    },
                )
            }
            GeminiLine::Message { role, body } => match role.as_deref() {
                Some("user") => LineOutcome::noise(&tag, NoiseKind::Echo),
                _ => LineOutcome::text(&tag, extract_text(&body)),
            },
            GeminiLine::ToolUse {
                tool_name,
                parameters,
            } => self.tool_use(&tag, &tool_name, &parameters),
            GeminiLine::ToolResult { status, error } => match status.as_deref() {
                Some("error") => {
                    let detail = error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "no details".to_string());
                    LineOutcome::emit(&tag, TestGenEventKind::warn(format!("Tool failed: {detail}")))
                }
                _ => LineOutcome::noise(&tag, NoiseKind::Other),
            },
            GeminiLine::Error { severity, message } => {
                let message = message.unwrap_or_else(|| "Gemini error".to_string());
                let event = match severity.as_deref() {
                    Some("warning") | Some("warn") => TestGenEventKind::warn(message),
                    _ => TestGenEventKind::error(message),
                };
                LineOutcome::emit(&tag, event)
            }
            GeminiLine::Result {
                status,
                stats,
                error,
            } => {
                let status = status.unwrap_or_else(|| "success".to_string());
                if status == "error" {
                    let detail = error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    return LineOutcome::emit(
                        &tag,
                        TestGenEventKind::error(format!("Gemini reported an error: {detail}")),
                    );
                }
                let stats = stats.unwrap_or_default();
                let mut message = super::finish_summary(&status, stats.duration_ms, None);
                if let Some(tokens) = stats.total_tokens {
                    message.push_str(&format!(", {tokens} tokens"));
                }
                if let Some(calls) = stats.tool_calls {
                    message.push_str(&format!(", {calls} tool calls"));
                }
                LineOutcome::emit(&tag, TestGenEventKind::info(message))
            }
            GeminiLine::Unknown => LineOutcome::unknown(Some(&tag)),
        }
    }
}
