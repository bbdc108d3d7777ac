use std::time::Duration;

use thiserror::Error;

/// Why a provider could not produce a value.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to read file {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {metric}: {reason}")]
    Parse { metric: String, reason: String },

    #[error("Command '{command}' failed: {source}")]
    CommandExecution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with {status}")]
    CommandFailed { command: String, status: String },

    #[error("System call failed: {syscall} - {reason}")]
    SystemCall { syscall: String, reason: String },

    /// The source exists but reported nothing, e.g. no wireless interface.
    #[error("No value available: {0}")]
    NoValue(String),

    #[error("Provider did not answer within {0:?}")]
    Timeout(Duration),

    /// A static sensor was asked for its value before it was read.
    #[error("Static value for '{0}' was never read")]
    NotBaked(String),

    #[error("Unsupported on this host: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn parse(metric: impl Into<String>, reason: impl Into<String>) -> Self {
        ProviderError::Parse {
            metric: metric.into(),
            reason: reason.into(),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
