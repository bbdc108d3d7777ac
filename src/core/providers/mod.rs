//! Host metric providers.
//!
//! Each built-in provider reads one value from `/proc`, `/sys`, a syscall or
//! a short-lived command, and registers itself under the sensor id it serves.

pub mod cpu;
pub mod disk;
pub mod error;
pub mod memory;
pub mod network;
pub mod registry;
pub mod system;
pub mod traits;
pub mod value;

use std::{path::Path, process::Stdio};

use tokio::process::Command;

pub use error::{ProviderError, ProviderResult};
pub use registry::ProviderRegistry;
pub use traits::{from_fn, MetricProvider};
pub use value::SensorValue;

pub(crate) async fn read_file(path: impl AsRef<Path>) -> ProviderResult<String> {
    let path = path.as_ref();
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProviderError::FileRead {
            path: path.display().to_string(),
            source,
        })
}

/// Runs `program` with a C locale and returns its stdout. A non-zero exit is
/// an error. The child is killed if the read is cancelled.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> ProviderResult<String> {
    let command = if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    };
    let output = Command::new(program)
        .args(args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProviderError::CommandExecution {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProviderError::CommandFailed {
            command,
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Rounds to one decimal place.
pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_file_reports_path() {
        let err = read_file("/nonexistent/sysqtt").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sysqtt"));
    }

    #[tokio::test]
    async fn missing_command_is_execution_error() {
        let err = run_command("sysqtt-no-such-binary", &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::CommandExecution { .. }));
    }

    #[test]
    fn round1_rounds_half_away() {
        assert_eq!(round1(12.345), 12.3);
        assert_eq!(round1(0.25), 0.3);
    }
}
