//! Plugin discovery from filesystem directories.
//!
//! Scans plugin roots for `<name>/PLUGIN.toml` manifests. Used to list what
//! `Kernel::load_plugin` could pick up without loading anything.

use std::path::PathBuf;

use {
    async_trait::async_trait,
    kindle_config::KindleConfig,
    kindle_kernel::{MANIFEST_FILE, PluginManifest, SourceTier},
    tracing::warn,
};

/// A manifest found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// Name the plugin registers under.
    pub name: String,
    pub dir: PathBuf,
    pub tier: SourceTier,
    pub manifest: PluginManifest,
}

#[async_trait]
pub trait PluginDiscoverer: Send + Sync {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredPlugin>>;
}

/// Scans directories in priority order.
pub struct FsPluginDiscoverer {
    search_paths: Vec<(PathBuf, SourceTier)>,
}

impl FsPluginDiscoverer {
    pub fn new(search_paths: Vec<(PathBuf, SourceTier)>) -> Self {
        Self { search_paths }
    }

    /// Configured user directories, then the community directory.
    pub fn default_paths(config: &KindleConfig) -> Vec<(PathBuf, SourceTier)> {
        let mut paths: Vec<(PathBuf, SourceTier)> = config
            .plugin_dirs
            .iter()
            .map(|dir| (dir.clone(), SourceTier::User))
            .collect();
        if let Some(data_dir) = kindle_config::data_dir() {
            paths.push((data_dir.join("plugins"), SourceTier::Community));
        }
        paths
    }
}

#[async_trait]
impl PluginDiscoverer for FsPluginDiscoverer {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredPlugin>> {
        let mut plugins = Vec::new();

        for (base_path, tier) in &self.search_paths {
            if !base_path.is_dir() {
                continue;
            }

            let entries = match std::fs::read_dir(base_path) {
                Ok(e) => e,
                Err(_) => continue,
            };

            let mut dirs: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.join(MANIFEST_FILE).is_file())
                .collect();
            dirs.sort();

            for dir in dirs {
                let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()).map(String::from)
                else {
                    continue;
                };
                match PluginManifest::read(&dir) {
                    Ok(manifest) => plugins.push(DiscoveredPlugin {
                        name: manifest.name.clone().unwrap_or(dir_name),
                        dir,
                        tier: *tier,
                        manifest,
                    }),
                    Err(e) => warn!(?dir, error = %e, "failed to read plugin manifest"),
                }
            }
        }

        Ok(plugins)
    }
}
