//! Oversized-prompt handling for remote sessions.
//!
//! Session prompts have a practical size limit. Large prompts are split into
//! a diff, structured context data, and the remaining instructions, uploaded
//! as separate files, and replaced by a short prompt that references them.

use super::client::SessionApi;
use crate::provider::emitter::RunEmitter;

pub const DIFF_FILE: &str = "changes.diff";
pub const INSTRUCTIONS_FILE: &str = "instructions.md";

/// A prompt separated by content type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptParts {
    pub diff: Option<String>,
    /// Structured data and the file extension it should be uploaded with.
    pub data: Option<(String, &'static str)>,
    pub text: String,
}

/// File to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content: String,
}

enum Block {
    Diff,
    Data(&'static str),
    Other,
}

fn classify_fence(info: &str) -> Block {
    match info.trim().to_ascii_lowercase().as_str() {
        "diff" | "patch" => Block::Diff,
        "json" | "jsonc" => Block::Data("json"),
        "yaml" | "yml" => Block::Data("yaml"),
        _ => Block::Other,
    }
}

fn is_diff_line(line: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "diff --git ",
        "index ",
        "--- ",
        "+++ ",
        "@@",
        "new file mode",
        "deleted file mode",
        "old mode",
        "new mode",
        "similarity index",
        "rename from",
        "rename to",
        "Binary files",
        "\\ No newline",
        "+",
        "-",
        " ",
    ];
    line.is_empty() || PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

fn append(target: &mut String, block: &str) {
    let block = block.trim_end();
    if block.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(block);
    target.push('\n');
}

/// Split `prompt` into diff, data, and free-text parts.
///
/// Fenced `diff`/`patch` blocks and unfenced `diff --git` runs become the
/// diff; fenced `json`/`yaml` blocks become data. Everything else, including
/// other fenced blocks, stays in the text.
pub fn split_prompt(prompt: &str) -> PromptParts {
    let mut diff = String::new();
    let mut data = String::new();
    let mut data_ext: Option<&'static str> = None;
    let mut text = String::new();

    let lines = prompt.lines().collect::<Vec<_>>();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(info) = line.trim_start().strip_prefix("```") {
            let kind = classify_fence(info);
            let start = i + 1;
            let mut end = start;
            while end < lines.len() && !lines[end].trim_start().starts_with("```") {
                end += 1;
            }
            let body = lines[start..end].join("\n");
            // Skip the closing fence when present.
            let next = (end + 1).min(lines.len());
            match kind {
                Block::Diff => append(&mut diff, &body),
                Block::Data(ext) => {
                    data_ext.get_or_insert(ext);
                    append(&mut data, &body);
                }
                Block::Other => {
                    text.push_str(&lines[i..next].join("\n"));
                    text.push('\n');
                }
            }
            i = next;
            continue;
        }
        if line.starts_with("diff --git ") {
            let start = i;
            i += 1;
            while i < lines.len()
                && is_diff_line(lines[i])
                && !lines[i].trim_start().starts_with("```")
            {
                i += 1;
            }
            append(&mut diff, &lines[start..i].join("\n"));
            continue;
        }
        text.push_str(line);
        text.push('\n');
        i += 1;
    }

    PromptParts {
        diff: (!diff.is_empty()).then_some(diff),
        data: data_ext.filter(|_| !data.is_empty()).map(|ext| (data, ext)),
        text: text.trim().to_string(),
    }
}

impl PromptParts {
    pub fn attachments(&self) -> Vec<Attachment> {
        let mut files = Vec::new();
        if !self.text.is_empty() {
            files.push(Attachment {
                file_name: INSTRUCTIONS_FILE.to_string(),
                content: self.text.clone(),
            });
        }
        if let Some(diff) = &self.diff {
            files.push(Attachment {
                file_name: DIFF_FILE.to_string(),
                content: diff.clone(),
            });
        }
        if let Some((data, ext)) = &self.data {
            files.push(Attachment {
                file_name: format!("context.{ext}"),
                content: data.clone(),
            });
        }
        files
    }
}

/// Short prompt pointing the session at uploaded files.
pub fn attachment_prompt(uploaded: &[(String, String)]) -> String {
    let mut prompt = String::from(
        "The full task is too large to send inline, so it has been attached as files.\n\
         Read every attachment before starting. instructions.md describes the task; \
         the other files are the code changes and context it refers to.\n\n",
    );
    for (file_name, url) in uploaded {
        prompt.push_str(&format!("ATTACHMENT:\"{url}\"\n"));
        tracing::trace!(%file_name, %url, "attachment referenced");
    }
    prompt
}

/// Cut `prompt` to `max_chars` and say so explicitly.
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    let total = prompt.chars().count();
    if total <= max_chars {
        return prompt.to_string();
    }
    let kept: String = prompt.chars().take(max_chars).collect();
    format!("{kept}\n\n[Prompt truncated from {total} to {max_chars} characters]")
}

/// Produce the prompt to send, uploading attachments when it is too long.
pub(crate) async fn prepare_prompt(
    api: &dyn SessionApi,
    prompt: &str,
    inline_limit: usize,
    truncated_size: usize,
    emitter: &RunEmitter,
) -> String {
    let length = prompt.chars().count();
    if length <= inline_limit {
        return prompt.to_string();
    }

    let parts = split_prompt(prompt);
    let mut uploaded = Vec::new();
    for attachment in parts.attachments() {
        match api
            .upload_attachment(&attachment.file_name, attachment.content)
            .await
        {
            Ok(url) => uploaded.push((attachment.file_name, url)),
            Err(err) => {
                tracing::warn!(task_id = emitter.task_id(), file = %attachment.file_name, error = %err, "attachment upload failed");
                emitter.warn(format!(
                    "Could not upload {} ({err}); sending a truncated prompt instead",
                    attachment.file_name
                ));
                return truncate_prompt(prompt, truncated_size);
            }
        }
    }
    emitter.info(format!(
        "Prompt is {length} characters; sent as {} attachment(s)",
        uploaded.len()
    ));
    attachment_prompt(&uploaded)
}
