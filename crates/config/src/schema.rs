//! Config schema types.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KindleConfig {
    /// Adapter names to initialize at startup, in order.
    pub adapters: Vec<String>,
    /// User plugin directories, searched before the builtin catalog.
    pub plugin_dirs: Vec<PathBuf>,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,
    /// Plugins to load at startup.
    #[serde(deserialize_with = "deserialize_plugins")]
    pub plugins: Vec<PluginEntry>,
    pub console: ConsoleConfig,
}

impl Default for KindleConfig {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            plugin_dirs: vec![PathBuf::from("plugins")],
            log_level: "info".into(),
            plugins: Vec::new(),
            console: ConsoleConfig::default(),
        }
    }
}

/// One entry of the `plugins` list.
///
/// Accepts either a bare name (`"echo"`) or a table
/// (`{ name = "echo", enable = false }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

impl PluginEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable: true,
            options: serde_json::Value::Null,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPluginEntry {
    Name(String),
    Entry(PluginEntry),
}

fn deserialize_plugins<'de, D>(deserializer: D) -> Result<Vec<PluginEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<RawPluginEntry>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|entry| match entry {
            RawPluginEntry::Name(name) => PluginEntry::named(name),
            RawPluginEntry::Entry(entry) => entry,
        })
        .collect())
}

/// Settings for the built-in console adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Id the console bot reports for itself.
    pub self_id: String,
    /// Id used as the sender of every console line.
    pub user_id: String,
    /// Conversation scope console lines are delivered as.
    pub scope: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            self_id: "kindle".into(),
            user_id: "console".into(),
            scope: "direct".into(),
        }
    }
}
