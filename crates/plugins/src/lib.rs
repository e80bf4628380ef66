//! Plugins shipped with kindle.
//!
//! - `command-parser`: command routing middleware plus `/帮助`
//! - `plugin-manager`: `/插件列表`, `/启用插件`, `/禁用插件`
//! - `echo`: `/echo`

pub mod command_parser;
pub mod discovery;
pub mod echo;
pub mod plugin_manager;

use {
    kindle_kernel::{Kernel, Plugin, PluginCatalog},
    serde_json::Value,
};

pub use discovery::{DiscoveredPlugin, FsPluginDiscoverer, PluginDiscoverer};

type Builder = fn(&Value) -> anyhow::Result<Plugin>;

const BUILTINS: &[(&str, Builder)] = &[
    (command_parser::NAME, command_parser::plugin),
    (plugin_manager::NAME, plugin_manager::plugin),
    (echo::NAME, echo::plugin),
];

/// Catalog of every bundled plugin.
pub fn builtin_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    for &(name, build) in BUILTINS {
        catalog.register(name, build);
    }
    catalog
}

/// Make the bundled plugins loadable by name through `kernel`.
pub fn register_builtins(kernel: &Kernel) {
    for &(name, build) in BUILTINS {
        kernel.register_plugin_factory(name, build);
    }
}
