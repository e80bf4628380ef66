/// Crate-wide result type for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by adapters and the adapter registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Adapter settings or inbound values that cannot be used.
    #[error("invalid adapter input: {message}")]
    InvalidInput { message: String },

    #[error("unknown adapter: {name}")]
    UnknownAdapter { name: String },

    /// The adapter is in the wrong state for the call (not mounted, already started).
    #[error("adapter not ready: {message}")]
    NotReady { message: String },

    /// A registered factory refused to build its adapter.
    #[error("adapter '{name}' failed to initialize: {source}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Reading from or writing to the adapter's transport failed.
    #[error("adapter i/o failed: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn not_ready(message: impl std::fmt::Display) -> Self {
        Self::NotReady {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_adapter(name: impl std::fmt::Display) -> Self {
        Self::UnknownAdapter {
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
