//! Environment adjustments for backend children.

/// Variables whose presence means we were launched from an IDE terminal.
const IDE_MARKERS: &[&str] = &["VSCODE_PID", "VSCODE_IPC_HOOK_CLI", "CURSOR_TRACE_ID"];

/// Whether the host environment belongs to an editor-integrated terminal.
pub fn is_ide_host(lookup: impl Fn(&str) -> Option<String>) -> bool {
    if lookup("TERM_PROGRAM").is_some_and(|value| value.eq_ignore_ascii_case("vscode")) {
        return true;
    }
    IDE_MARKERS
        .iter()
        .any(|name| lookup(name).is_some_and(|value| !value.is_empty()))
}

/// Overrides that keep a child from opening an editor or pager it can't drive.
pub fn child_env_overrides(lookup: impl Fn(&str) -> Option<String>) -> Vec<(String, String)> {
    if !is_ide_host(lookup) {
        return Vec::new();
    }
    [
        ("EDITOR", "true"),
        ("VISUAL", "true"),
        ("GIT_EDITOR", "true"),
        ("PAGER", "cat"),
        ("GIT_PAGER", "cat"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}
