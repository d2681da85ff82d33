//! Default configuration constants.

/// Annotated `testgen.toml` shipped with the crate.
pub const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../templates/testgen.toml");
/// File name looked up locally and under the config root.
pub(super) const CONFIG_FILE_NAME: &str = "testgen.toml";
/// Directory under `$XDG_CONFIG_HOME`.
pub(super) const CONFIG_DIR_NAME: &str = "testgen";

pub(super) const DEFAULT_DEVIN_BASE_URL: &str = "https://api.devin.ai/v1";
pub(super) const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub(super) const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub(super) const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;
pub(super) const DEFAULT_MAX_POLL_SECS: u64 = 45 * 60;
pub(super) const DEFAULT_MAX_UNBLOCK_ATTEMPTS: u32 = 2;
pub(super) const DEFAULT_SETTLE_POLLS: u32 = 3;
pub(super) const DEFAULT_INLINE_PROMPT_LIMIT: usize = 30_000;
pub(super) const DEFAULT_TRUNCATED_PROMPT_SIZE: usize = 20_000;
pub(super) const DEFAULT_COMPLETION_MARKER: &str = "TESTGEN_COMPLETE";
pub(super) const DEFAULT_SESSION_TAG: &str = "testgen";
/// Upper bound for every duration tunable (30 days).
pub(super) const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;
