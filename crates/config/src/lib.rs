//! Configuration loading and env substitution.
//!
//! Config files: `kindle.toml`, `kindle.yaml`, `kindle.yml` or `kindle.json`,
//! searched in `./` then `~/.config/kindle/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw
//! file before it is parsed.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file, load_config,
    },
    schema::{ConsoleConfig, KindleConfig, PluginEntry},
};
