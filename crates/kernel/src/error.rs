use std::error::Error as StdError;

use crate::plugin::LifecyclePhase;

/// Crate-level error type for the plugin host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("plugin '{name}' is already registered")]
    DuplicatePlugin { name: String },

    #[error("plugin '{name}' does not exist")]
    UnknownPlugin { name: String },

    #[error("command '{command}' of plugin '{plugin}' is already provided by '{owner}'")]
    DuplicateCommand {
        command: String,
        plugin: String,
        owner: String,
    },

    #[error("command '{command}' declares unknown parent '{parent}'")]
    UnknownParent { command: String, parent: String },

    #[error("invalid command template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("invalid sugar pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("service dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("plugin '{plugin}' failed during {phase}: {source}")]
    Hook {
        plugin: String,
        phase: LifecyclePhase,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("plugin '{plugin}' installer failed: {source}")]
    Install {
        plugin: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("plugin '{name}' could not be loaded: {reason}")]
    Load { name: String, reason: String },

    #[error(transparent)]
    Adapter(#[from] kindle_channels::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn unknown_plugin(name: impl Into<String>) -> Self {
        Self::UnknownPlugin { name: name.into() }
    }

    pub(crate) fn hook(plugin: &str, phase: LifecyclePhase, source: anyhow::Error) -> Self {
        Self::Hook {
            plugin: plugin.to_string(),
            phase,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
