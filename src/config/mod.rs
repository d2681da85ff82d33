//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`TESTGEN_DEVIN_API_KEY` with `DEVIN_API_KEY`
//!    fallback, `TESTGEN_DEVIN_BASE_URL`, `TESTGEN_<BACKEND>_COMMAND`,
//!    `TESTGEN_AUTO_KILL_SECS`).
//! 2. TOML file specified via `--config`
//! 3. `./testgen.toml` in the current directory
//! 4. `$XDG_CONFIG_HOME/testgen/testgen.toml` (or `~/.config/testgen/testgen.toml`)
//! 5. Built-in defaults

mod defaults;
mod env;
mod loader;
mod sources;
mod types;

pub use defaults::DEFAULT_CONFIG_TEMPLATE;
pub use loader::{load_config, load_config_with_source, LoadedConfig};
pub use sources::{config_root_dir, ConfigSource};
pub use types::{CommandsConfig, Config, DevinConfig, LivenessConfig};
