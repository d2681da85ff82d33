//! Environment overrides.
//!
//! `TESTGEN_*` variables win over file values. `DEVIN_API_KEY` is honored as
//! a fallback for the API key because that is what Devin's own tooling reads.

use crate::error::ConfigError;
use crate::types::BackendKind;

use super::Config;

pub(super) fn apply_env_overrides<FEnv>(config: &mut Config, env_lookup: &FEnv) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(key) = env_with_fallback(env_lookup, "TESTGEN_DEVIN_API_KEY", "DEVIN_API_KEY") {
        config.devin.api_key = Some(key);
    }
    if let Some(url) = non_empty(env_lookup("TESTGEN_DEVIN_BASE_URL")) {
        config.devin.base_url = url;
    }
    for kind in BackendKind::ALL {
        let var = format!("TESTGEN_{}_COMMAND", kind.as_str().to_ascii_uppercase());
        if let (Some(command), Some(slot)) =
            (non_empty(env_lookup(&var)), config.commands.slot_mut(kind))
        {
            *slot = Some(command);
        }
    }
    if let Some(secs) = non_empty(env_lookup("TESTGEN_AUTO_KILL_SECS")) {
        let parsed = secs.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid TESTGEN_AUTO_KILL_SECS value `{secs}`: expected integer seconds"
            ))
        })?;
        config.liveness.auto_kill_secs = parsed;
    }
    Ok(())
}

/// Resolve a value from the canonical variable or, if absent, its fallback.
pub(super) fn env_with_fallback<FEnv>(env_lookup: &FEnv, canonical: &str, fallback: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    non_empty(env_lookup(canonical)).or_else(|| non_empty(env_lookup(fallback)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
