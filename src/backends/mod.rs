//! Process backends: argv conventions and line-protocol mappers.

pub mod claude;
pub mod codex;
pub mod cursor;
pub mod gemini;

pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use cursor::CursorBackend;
pub use gemini::GeminiBackend;

use crate::mapping::{tag_of, LineOutcome};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a tagged line into a backend's line enum.
///
/// Missing tags and shape mismatches come back as the outcome to report.
pub(crate) fn parse_tagged<T: DeserializeOwned>(value: Value) -> Result<(String, T), LineOutcome> {
    let Some(tag) = tag_of(&value).map(str::to_string) else {
        return Err(LineOutcome::unknown(None));
    };
    match serde_json::from_value::<T>(value) {
        Ok(line) => Ok((tag, line)),
        Err(err) => Err(LineOutcome::malformed(&tag, err)),
    }
}

/// One-line summary for a backend's final `result` record.
pub(crate) fn finish_summary(status: &str, duration_ms: Option<u64>, turns: Option<u64>) -> String {
    let mut summary = format!("Finished: {status}");
    if let Some(ms) = duration_ms {
        summary.push_str(&format!(" in {:.1}s", ms as f64 / 1000.0));
    }
    match turns {
        Some(1) => summary.push_str(" (1 turn)"),
        Some(n) => summary.push_str(&format!(" ({n} turns)")),
        None => {}
    }
    summary
}
