//! Cursor agent CLI (`cursor-agent -p --output-format stream-json`).
//!
//! Tool calls arrive in two halves sharing a `call_id`: `started` carries the
//! arguments, `completed` carries the result. Only write/edit calls are
//! tracked.

use super::{finish_summary, parse_tagged};
use crate::liveness::NoiseKind;
use crate::mapping::{
    extract_text, first_str, is_write_like, LineMapper, LineOutcome, MapContext, ToolCallRegistry,
};
use crate::process::ProcessBackend;
use crate::types::{BackendKind, RunRequest, TestGenEventKind};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct CursorBackend;

impl ProcessBackend for CursorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cursor
    }

    fn default_command(&self) -> &'static str {
        "cursor-agent"
    }

    fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            request.output_format.flag_value().to_string(),
        ];
        if request.allow_writes {
            args.push("--force".to_string());
        }
        if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args.push(request.prompt.clone());
        args
    }

    fn stdin_payload(&self, _request: &RunRequest) -> Option<String> {
        None
    }

    fn new_mapper(&self, ctx: MapContext) -> Box<dyn LineMapper> {
        Box::new(CursorMapper {
            ctx,
            registry: ToolCallRegistry::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CursorLine {
    System {
        #[serde(default)]
        model: Option<String>,
    },
    User {},
    Thinking {},
    Assistant {
        #[serde(default)]
        message: Value,
    },
    ToolCall {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        tool_call: Map<String, Value>,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

struct CursorMapper {
    ctx: MapContext,
    registry: ToolCallRegistry,
}

impl CursorMapper {
    fn tool_call(
        &mut self,
        tag: &str,
        subtype: Option<&str>,
        call_id: &str,
        tool_call: &Map<String, Value>,
    ) -> LineOutcome {
        // The payload is keyed by tool kind, e.g. `writeToolCall`.
        let write = tool_call.iter().find(|(key, _)| is_write_like(key));
        match subtype {
            Some("started") => {
                let Some((_, call)) = write else {
                    return LineOutcome::noise(tag, NoiseKind::Other);
                };
                let path = call
                    .get("args")
                    .and_then(|args| first_str(args, &["path", "file_path", "filePath"]));
                match path {
                    Some(path) if !call_id.is_empty() => {
                        self.registry.record(call_id, path);
                        LineOutcome::silent(tag)
                    }
                    _ => LineOutcome::malformed(tag, "write call without id or path"),
                }
            }
            Some("completed") => {
                let recorded = self.registry.resolve(call_id);
                let (Some((_, call)), Some(recorded_path)) = (write, recorded.into_iter().next())
                else {
                    return LineOutcome::noise(tag, NoiseKind::Other);
                };
                let result = call.get("result");
                let Some(success) = result.and_then(|r| r.get("success")) else {
                    return LineOutcome::emit(
                        tag,
                        TestGenEventKind::warn(format!("Write to {recorded_path} failed")),
                    );
                };
                let path = first_str(success, &["path"]).unwrap_or(&recorded_path);
                let lines = success.get("linesCreated").and_then(Value::as_u64);
                LineOutcome::emit(tag, self.ctx.file_write(path, lines))
            }
            _ => LineOutcome::noise(tag, NoiseKind::Other),
        }
    }
}

impl LineMapper for CursorMapper {
    fn map_value(&mut self, value: Value) -> LineOutcome {
        let (tag, line) = match parse_tagged::<CursorLine>(value) {
            Ok(parsed) => parsed,
            Err(outcome) => return outcome,
        };
        match line {
            CursorLine::System { model } => {
                let message = match model {
                    Some(model) => format!("Session initialized (model: {model})"),
                    None => "Session initialized".to_string(),
                };
                LineOutcome::emit(&tag, TestGenEventKind::info(message))
            }
            CursorLine::User {} => LineOutcome::noise(&tag, NoiseKind::Echo),
            CursorLine::Thinking {} => LineOutcome::noise(&tag, NoiseKind::Reasoning),
            CursorLine::Assistant { message } => LineOutcome::text(&tag, extract_text(&message)),
            CursorLine::ToolCall {
                subtype,
                call_id,
                tool_call,
            } => self.tool_call(&tag, subtype.as_deref(), &call_id, &tool_call),
            CursorLine::Result {
                subtype,
                is_error,
                result,
                duration_ms,
            } => {
                let event = if is_error {
                    let detail = result
                        .or(subtype)
                        .unwrap_or_else(|| "unknown error".to_string());
                    TestGenEventKind::error(format!("Cursor agent reported an error: {detail}"))
                } else {
                    TestGenEventKind::info(finish_summary(
                        subtype.as_deref().unwrap_or("success"),
                        duration_ms,
                        None,
                    ))
                };
                LineOutcome::emit(&tag, event)
            }
            CursorLine::Unknown => LineOutcome::unknown(Some(&tag)),
        }
    }
}
