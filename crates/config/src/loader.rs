use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::KindleConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["kindle.toml", "kindle.yaml", "kindle.yml", "kindle.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<KindleConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./kindle.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/kindle/kindle.{toml,yaml,yml,json}` (user-global)
///
/// Returns `KindleConfig::default()` if no config file is found or the one
/// found fails to parse.
pub fn discover_and_load() -> KindleConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    KindleConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/kindle/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kindle").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user-global data directory (`~/.local/share/kindle/`).
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kindle").map(|d| d.data_dir().to_path_buf())
}

/// Apply `KINDLE_LOG_LEVEL` and `KINDLE_ADAPTERS` (comma separated) on top of
/// a loaded config.
pub fn apply_env_overrides(config: KindleConfig) -> KindleConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: KindleConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> KindleConfig {
    if let Some(level) = lookup("KINDLE_LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
        config.log_level = level.trim().to_string();
    }
    if let Some(adapters) = lookup("KINDLE_ADAPTERS") {
        config.adapters = adapters
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> Result<KindleConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_each_supported_format() {
        let tmp = tempfile::tempdir().unwrap();

        let toml_path = tmp.path().join("kindle.toml");
        std::fs::write(&toml_path, "adapters = [\"console\"]\nlog_level = \"debug\"\n").unwrap();
        let cfg = load_config(&toml_path).unwrap();
        assert_eq!(cfg.adapters, vec!["console"]);
        assert_eq!(cfg.log_level, "debug");

        let yaml_path = tmp.path().join("kindle.yaml");
        std::fs::write(&yaml_path, "plugins:\n  - echo\n  - name: command-parser\n").unwrap();
        let cfg = load_config(&yaml_path).unwrap();
        assert_eq!(cfg.plugins.len(), 2);
        assert_eq!(cfg.plugins[1].name, "command-parser");

        let json_path = tmp.path().join("kindle.json");
        std::fs::write(&json_path, r#"{"plugin_dirs": ["/opt/kindle"]}"#).unwrap();
        let cfg = load_config(&json_path).unwrap();
        assert_eq!(cfg.plugin_dirs, vec![PathBuf::from("/opt/kindle")]);
    }

    #[test]
    fn rejects_unknown_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kindle.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension } if extension == "ini"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/kindle.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kindle.toml"));
    }

    #[test]
    fn env_overrides_replace_level_and_adapters() {
        let lookup = |name: &str| match name {
            "KINDLE_LOG_LEVEL" => Some("trace".to_string()),
            "KINDLE_ADAPTERS" => Some("console, ,telegram".to_string()),
            _ => None,
        };
        let cfg = apply_env_overrides_with(KindleConfig::default(), lookup);
        assert_eq!(cfg.log_level, "trace");
        assert_eq!(cfg.adapters, vec!["console", "telegram"]);
    }
}
