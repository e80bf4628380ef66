//! CLI commands for plugin inspection.

use clap::Subcommand;

use {
    kindle_config::KindleConfig,
    kindle_plugins::{FsPluginDiscoverer, PluginDiscoverer, builtin_catalog},
};

#[derive(Subcommand)]
pub enum PluginAction {
    /// List builtin plugins and plugins found in plugin directories.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the manifest of a directory plugin.
    Info {
        /// Plugin name.
        name: String,
    },
}

pub async fn handle_plugins(action: PluginAction, config: &KindleConfig) -> anyhow::Result<()> {
    let discoverer = FsPluginDiscoverer::new(FsPluginDiscoverer::default_paths(config));
    let discovered = discoverer.discover().await?;
    let catalog = builtin_catalog();

    match action {
        PluginAction::List { json } => {
            if json {
                let mut entries: Vec<serde_json::Value> = catalog
                    .names()
                    .into_iter()
                    .map(|name| serde_json::json!({ "name": name, "source": "builtin" }))
                    .collect();
                entries.extend(discovered.iter().map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "source": p.tier,
                        "entry": p.manifest.entry.as_deref().unwrap_or(&p.name),
                        "description": p.manifest.description,
                        "enabled": p.manifest.enabled,
                        "path": p.dir,
                    })
                }));
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            for name in catalog.names() {
                println!("  {name} [builtin]");
            }
            for plugin in &discovered {
                let status = if plugin.manifest.enabled {
                    "✓"
                } else {
                    "✗"
                };
                println!(
                    "  {status} {name} — {desc} [{tier}]",
                    name = plugin.name,
                    desc = plugin.manifest.description,
                    tier = plugin.tier,
                );
            }
        },
        PluginAction::Info { name } => {
            let Some(plugin) = discovered.iter().find(|p| p.name == name) else {
                if catalog.contains(&name) {
                    println!("{name} is a builtin plugin");
                } else {
                    eprintln!("Plugin '{name}' not found.");
                }
                return Ok(());
            };
            let entry = plugin.manifest.entry.as_deref().unwrap_or(&plugin.name);
            println!("Name:        {}", plugin.name);
            println!("Entry:       {entry}");
            println!("Description: {}", plugin.manifest.description);
            println!("Source:      {}", plugin.tier);
            println!("Path:        {}", plugin.dir.display());
            println!("Enabled:     {}", plugin.manifest.enabled);
            if !plugin.manifest.adapters.is_empty() {
                println!("Adapters:    {}", plugin.manifest.adapters.join(", "));
            }
            if !plugin.manifest.requires.is_empty() {
                println!("Requires:    {}", plugin.manifest.requires.join(", "));
            }
            if !catalog.contains(entry) {
                eprintln!("warning: no builtin entry named '{entry}'");
            }
        },
    }

    Ok(())
}
