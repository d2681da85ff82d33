//! Top-level config loading pipeline.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::defaults::MAX_DURATION_SECS;
use super::env::apply_env_overrides;
use super::sources::{config_root_dir, read_config_text_with_sources, ConfigSource};
use super::Config;

/// Configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
}

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from `--config`).
pub fn load_config(path_override: Option<&str>) -> Result<Config, ConfigError> {
    Ok(load_config_with_source(path_override)?.config)
}

pub fn load_config_with_source(path_override: Option<&str>) -> Result<LoadedConfig, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

pub(super) fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedConfig, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (text, source) = read_config_text_with_sources(path_override, &read_file, &config_root)?;
    let mut config: Config = toml::from_str(&text)?;
    apply_env_overrides(&mut config, &env_lookup)?;
    validate(&config)?;
    tracing::debug!(?source, "configuration loaded");
    Ok(LoadedConfig { config, source })
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let liveness = &config.liveness;
    let devin = &config.devin;
    for (name, secs) in [
        ("liveness.initial_heartbeat_secs", liveness.initial_heartbeat_secs),
        ("liveness.heartbeat_interval_secs", liveness.heartbeat_interval_secs),
        ("liveness.silence_warn_secs", liveness.silence_warn_secs),
        ("liveness.silence_log_interval_secs", liveness.silence_log_interval_secs),
        ("liveness.check_interval_secs", liveness.check_interval_secs),
        ("liveness.ignored_summary_secs", liveness.ignored_summary_secs),
        ("liveness.auto_kill_secs", liveness.auto_kill_secs),
        ("devin.poll_interval_secs", devin.poll_interval_secs),
        ("devin.max_backoff_secs", devin.max_backoff_secs),
        ("devin.max_poll_secs", devin.max_poll_secs),
    ] {
        if secs > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid(format!(
                "{name} must be at most {MAX_DURATION_SECS} seconds (got {secs})"
            )));
        }
    }
    if devin.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "devin.poll_interval_secs must be at least 1".into(),
        ));
    }
    if !(devin.backoff_multiplier >= 1.0 && devin.backoff_multiplier.is_finite()) {
        return Err(ConfigError::Invalid(format!(
            "devin.backoff_multiplier must be >= 1.0 (got {})",
            devin.backoff_multiplier
        )));
    }
    if devin.max_backoff_secs < devin.poll_interval_secs {
        return Err(ConfigError::Invalid(
            "devin.max_backoff_secs must not be below devin.poll_interval_secs".into(),
        ));
    }
    if devin.truncated_prompt_size == 0 || devin.truncated_prompt_size > devin.inline_prompt_limit {
        return Err(ConfigError::Invalid(
            "devin.truncated_prompt_size must be between 1 and devin.inline_prompt_limit".into(),
        ));
    }
    Ok(())
}
