mod config_commands;
mod plugin_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    kindle_config::KindleConfig,
    kindle_kernel::Kernel,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "kindle", about = "kindle — plugin-driven chat bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "KINDLE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot (default when no subcommand is provided).
    Run,
    /// Inspect loadable plugins.
    Plugins {
        #[command(subcommand)]
        action: plugin_commands::PluginAction,
    },
    /// Inspect the effective configuration.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<KindleConfig> {
    let config = match &cli.config {
        Some(path) => kindle_config::load_config(path)?,
        None => kindle_config::discover_and_load(),
    };
    Ok(kindle_config::apply_env_overrides(config))
}

fn init_telemetry(cli: &Cli, config: &KindleConfig) {
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Build a kernel with the bundled plugins available.
fn build_kernel(config: KindleConfig) -> Arc<Kernel> {
    let kernel = Kernel::new(config);
    kindle_plugins::register_builtins(&kernel);
    kernel
}

async fn run(config: KindleConfig) -> anyhow::Result<()> {
    let kernel = build_kernel(config);
    kernel.start().await;
    info!(
        plugins = kernel.plugins().len(),
        adapters = kernel.adapters().len(),
        "kindle ready, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    kernel.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_telemetry(&cli, &config);

    info!(version = env!("CARGO_PKG_VERSION"), "kindle starting");

    match cli.command {
        None | Some(Commands::Run) => run(config).await,
        Some(Commands::Plugins { action }) => plugin_commands::handle_plugins(action, &config).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, &config, cli.config.as_deref())
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_runs_the_bot() {
        let cli = Cli::try_parse_from(["kindle"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.json_logs);
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kindle.toml");
        std::fs::write(
            &path,
            "plugin_dirs = []\n\n[[plugins]]\nname = \"echo\"\nenable = false\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from(["kindle", "--config", path.to_str().unwrap(), "config", "path"])
            .unwrap();
        let config = load_config(&cli).unwrap();
        assert!(config.plugin_dirs.is_empty());
        assert_eq!(config.plugins.len(), 1);
        assert!(!config.plugins[0].enable);
        assert!(matches!(cli.command, Some(Commands::Config { .. })));
    }

    #[test]
    fn builtins_are_registered_on_the_kernel() {
        let kernel = build_kernel(KindleConfig::default());
        assert!(kernel.catalog().contains(kindle_plugins::command_parser::NAME));
    }
}
