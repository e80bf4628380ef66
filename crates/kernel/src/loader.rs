//! Plugin sources consulted by [`crate::Kernel::load_plugin`].
//!
//! Candidates are tried in tier order: user plugin directories from the
//! config, the builtin catalog, then the community directory under the user
//! data dir. A directory plugin lives in `<root>/<name>/PLUGIN.toml` and
//! points at a catalog entry that builds it.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, bail},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::plugin::Plugin;

pub const MANIFEST_FILE: &str = "PLUGIN.toml";

/// Where a plugin candidate comes from, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    User,
    Builtin,
    Community,
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Builtin => "builtin",
            Self::Community => "community",
        })
    }
}

/// Resolves a plugin name to a plugin definition.
pub trait PluginSource: Send + Sync {
    fn tier(&self) -> SourceTier;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    fn load(&self, name: &str, options: &Value) -> anyhow::Result<Plugin>;
}

/// Builds a plugin from its configured options.
pub type PluginFactory = Arc<dyn Fn(&Value) -> anyhow::Result<Plugin> + Send + Sync>;

/// Plugins compiled into the binary, keyed by entry name.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("entries", &self.names())
            .finish()
    }
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> anyhow::Result<Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, entry: &str, options: &Value) -> anyhow::Result<Plugin> {
        let Some(factory) = self.factories.get(entry) else {
            bail!("no builtin plugin named '{entry}'");
        };
        factory(options)
    }
}

impl PluginSource for PluginCatalog {
    fn tier(&self) -> SourceTier {
        SourceTier::Builtin
    }

    fn describe(&self) -> String {
        "builtin catalog".into()
    }

    fn load(&self, name: &str, options: &Value) -> anyhow::Result<Plugin> {
        self.build(name, options)
    }
}

/// `PLUGIN.toml` contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Registered name; defaults to the directory name.
    #[serde(default)]
    pub name: Option<String>,
    /// Catalog entry that builds the plugin; defaults to the name.
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Adapter allowlist; empty admits every adapter.
    #[serde(default)]
    pub adapters: Vec<String>,
    /// Services required on top of those the entry declares.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "empty_object")]
    pub options: Value,
}

fn default_true() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl PluginManifest {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read `<dir>/PLUGIN.toml`.
    pub fn read(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Manifest options overlaid with `overrides` (objects merge by key).
    pub fn merged_options(&self, overrides: &Value) -> Value {
        match (&self.options, overrides) {
            (Value::Object(base), Value::Object(extra)) => {
                let mut merged = base.clone();
                for (key, value) in extra {
                    merged.insert(key.clone(), value.clone());
                }
                Value::Object(merged)
            },
            (base, Value::Null) => base.clone(),
            (_, extra) => extra.clone(),
        }
    }
}

/// A directory of `<name>/PLUGIN.toml` plugins resolved against a catalog.
pub struct DirectorySource {
    root: PathBuf,
    tier: SourceTier,
    catalog: PluginCatalog,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, tier: SourceTier, catalog: PluginCatalog) -> Self {
        Self {
            root: root.into(),
            tier,
            catalog,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PluginSource for DirectorySource {
    fn tier(&self) -> SourceTier {
        self.tier
    }

    fn describe(&self) -> String {
        format!("{} directory {}", self.tier, self.root.display())
    }

    fn load(&self, name: &str, options: &Value) -> anyhow::Result<Plugin> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            bail!("{} does not exist", dir.display());
        }
        let manifest = PluginManifest::read(&dir)?;
        let entry = manifest.entry.as_deref().unwrap_or(name);
        let plugin = self
            .catalog
            .build(entry, &manifest.merged_options(options))?
            .renamed(manifest.name.as_deref().unwrap_or(name));

        if !manifest.description.is_empty() {
            plugin.describe(manifest.description.clone());
        }
        if !manifest.adapters.is_empty() {
            plugin.adapters(manifest.adapters.iter().cloned());
        }
        for service in &manifest.requires {
            plugin.require(service.clone());
        }
        if !manifest.enabled {
            plugin.disable();
        }
        Ok(plugin)
    }
}
