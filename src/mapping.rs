//! Shared building blocks for per-backend protocol mappers.
//!
//! Each backend decodes its JSON lines into its own tagged enum (see
//! `crate::backends`) and maps them onto [`LineOutcome`] values using the
//! helpers here, so text extraction, write-tool detection, and path
//! normalization behave identically across backends.

use crate::liveness::NoiseKind;
use crate::types::TestGenEventKind;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Result of mapping one protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    /// Raw protocol tag, when the line had one.
    pub tag: Option<String>,
    /// Set when the line is deliberately dropped.
    pub noise: Option<NoiseKind>,
    pub events: Vec<TestGenEventKind>,
}

impl LineOutcome {
    pub fn emit(tag: &str, event: TestGenEventKind) -> Self {
        Self {
            tag: Some(tag.to_string()),
            noise: None,
            events: vec![event],
        }
    }

    pub fn emit_all(tag: &str, events: Vec<TestGenEventKind>) -> Self {
        Self {
            tag: Some(tag.to_string()),
            noise: None,
            events,
        }
    }

    /// Emit an info log when `text` is present; nothing otherwise.
    pub fn text(tag: &str, text: Option<String>) -> Self {
        Self::emit_all(tag, text.map(TestGenEventKind::info).into_iter().collect())
    }

    pub fn noise(tag: &str, kind: NoiseKind) -> Self {
        Self {
            tag: Some(tag.to_string()),
            noise: Some(kind),
            events: Vec::new(),
        }
    }

    /// Recognized line that intentionally produces nothing visible.
    pub fn silent(tag: &str) -> Self {
        Self::emit_all(tag, Vec::new())
    }

    /// Catch-all for unrecognized or missing tags.
    pub fn unknown(tag: Option<&str>) -> Self {
        let label = tag.unwrap_or("unknown");
        Self {
            tag: tag.map(str::to_string),
            noise: None,
            events: vec![TestGenEventKind::info(format!("event:{label}"))],
        }
    }

    /// A recognized tag whose payload did not match the expected shape.
    pub fn malformed(tag: &str, detail: impl std::fmt::Display) -> Self {
        Self::emit(
            tag,
            TestGenEventKind::warn(format!("Unrecognized `{tag}` payload: {detail}")),
        )
    }
}

/// Stateful per-run mapper for one backend's line protocol.
pub trait LineMapper: Send {
    /// Map one parsed JSON line.
    fn map_value(&mut self, value: Value) -> LineOutcome;
}

/// Context every mapper needs to build events.
#[derive(Debug, Clone)]
pub struct MapContext {
    pub workspace_root: PathBuf,
}

impl MapContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    pub fn file_write(&self, raw_path: &str, lines_created: Option<u64>) -> TestGenEventKind {
        TestGenEventKind::file_write(
            normalize_path(&self.workspace_root, raw_path),
            lines_created,
        )
    }
}

/// Read the protocol tag (`type` field) of a JSON line.
pub fn tag_of(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Extract displayable text from a protocol payload.
///
/// Preference: `delta` string, then `content` string, then the `text` fields
/// of a `content` array (concatenated when several carry text), then a plain
/// `text` field. Whitespace-only results count as absent.
pub fn extract_text(value: &Value) -> Option<String> {
    if let Some(delta) = value.get("delta").and_then(Value::as_str) {
        return non_blank(delta);
    }
    match value.get("content") {
        Some(Value::String(content)) => return non_blank(content),
        Some(Value::Array(blocks)) => {
            let texts = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(text) => Some(text.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect::<Vec<_>>();
            return non_blank(&texts.concat());
        }
        _ => {}
    }
    value.get("text").and_then(Value::as_str).and_then(non_blank)
}

fn non_blank(text: &str) -> Option<String> {
    (!text.trim().is_empty()).then(|| text.to_string())
}

/// Case-insensitive write/edit tool-name check shared by backends that don't
/// publish a closed tool list.
pub fn is_write_like(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("write") || lower.contains("edit")
}

/// First string-valued field among `keys`.
pub fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// Number of lines in written content; empty content is zero lines.
pub fn count_lines(content: &str) -> u64 {
    content.lines().count() as u64
}

/// Make `raw` workspace-relative when it is an absolute path inside `root`.
///
/// Absolute paths outside the root and relative paths are returned unchanged.
pub fn normalize_path(root: &Path, raw: &str) -> String {
    let candidate = Path::new(raw);
    if !candidate.is_absolute() {
        return raw.to_string();
    }
    let root = lexical_clean(root);
    let clean = lexical_clean(candidate);
    match clean.strip_prefix(&root) {
        Ok(relative) if !relative.as_os_str().is_empty() => {
            relative.to_string_lossy().replace('\\', "/")
        }
        _ => raw.to_string(),
    }
}

// Resolve `.` and `..` without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Per-run map from opaque tool-invocation ids to the paths they will write.
#[derive(Debug, Default)]
pub struct ToolCallRegistry {
    pending: HashMap<String, Vec<String>>,
}

impl ToolCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: &str, path: impl Into<String>) {
        self.pending
            .entry(id.to_string())
            .or_default()
            .push(path.into());
    }

    /// Remove and return the paths recorded for `id`; unknown ids yield none.
    pub fn resolve(&mut self, id: &str) -> Vec<String> {
        self.pending.remove(id).unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_paths_inside_the_workspace() {
        let root = Path::new("/work/repo");
        assert_eq!(normalize_path(root, "/work/repo/a/b.ts"), "a/b.ts");
        assert_eq!(normalize_path(root, "/work/repo/./a/../c.ts"), "c.ts");
    }

    #[test]
    fn leaves_outside_and_relative_paths_alone() {
        let root = Path::new("/work/repo");
        assert_eq!(normalize_path(root, "/tmp/x.ts"), "/tmp/x.ts");
        assert_eq!(normalize_path(root, "/work/repository/x.ts"), "/work/repository/x.ts");
        assert_eq!(normalize_path(root, "src/x.ts"), "src/x.ts");
        assert_eq!(normalize_path(root, "/work/repo"), "/work/repo");
    }

    #[test]
    fn root_with_trailing_slash_still_matches() {
        assert_eq!(normalize_path(Path::new("/work/repo/"), "/work/repo/t.rs"), "t.rs");
    }

    #[test]
    fn extract_text_prefers_delta_then_content() {
        assert_eq!(
            extract_text(&json!({"delta": "d", "content": "c"})).as_deref(),
            Some("d")
        );
        assert_eq!(extract_text(&json!({"content": "c"})).as_deref(), Some("c"));
        assert_eq!(
            extract_text(&json!({"content": [{"type": "text", "text": "one"}]})).as_deref(),
            Some("one")
        );
    }

    #[test]
    fn extract_text_concatenates_multiple_blocks() {
        let value = json!({"content": [
            {"type": "text", "text": "a"},
            {"type": "image"},
            {"type": "text", "text": "b"}
        ]});
        assert_eq!(extract_text(&value).as_deref(), Some("ab"));
    }

    #[test]
    fn extract_text_treats_blank_as_absent() {
        assert_eq!(extract_text(&json!({"delta": "  "})), None);
        assert_eq!(extract_text(&json!({"content": []})), None);
        assert_eq!(extract_text(&json!({"other": 1})), None);
    }

    #[test]
    fn write_like_matches_case_insensitively() {
        assert!(is_write_like("write_file"));
        assert!(is_write_like("StrReplaceEdit"));
        assert!(!is_write_like("read_file"));
        assert!(!is_write_like("run_shell_command"));
    }

    #[test]
    fn registry_resolves_once_and_ignores_unknown_ids() {
        let mut registry = ToolCallRegistry::new();
        registry.record("call-1", "a.ts");
        assert!(registry.contains("call-1"));
        assert_eq!(registry.resolve("call-1"), vec!["a.ts".to_string()]);
        assert!(registry.resolve("call-1").is_empty());
        assert!(registry.resolve("nope").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_outcome_labels_missing_tags() {
        let outcome = LineOutcome::unknown(None);
        assert_eq!(outcome.events, vec![TestGenEventKind::info("event:unknown")]);
        let tagged = LineOutcome::unknown(Some("mystery"));
        assert_eq!(tagged.events, vec![TestGenEventKind::info("event:mystery")]);
    }

    #[test]
    fn count_lines_distinguishes_empty_content() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a\nb\n"), 2);
        assert_eq!(count_lines("a\nb"), 2);
    }
}
