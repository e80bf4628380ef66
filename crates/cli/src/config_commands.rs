use std::path::Path;

use {anyhow::Result, clap::Subcommand, kindle_config::KindleConfig};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file, env substitution and overrides applied).
    Show {
        /// Output as JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
    /// Print the path of the config file in use.
    Path,
}

pub fn handle_config(action: ConfigAction, config: &KindleConfig, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(config)?
            } else {
                toml::to_string_pretty(config)?
            };
            println!("{rendered}");
        },
        ConfigAction::Path => match explicit.map(Path::to_path_buf).or_else(kindle_config::find_config_file) {
            Some(path) => println!("{}", path.display()),
            None => eprintln!("No config file found; using defaults."),
        },
    }
    Ok(())
}
