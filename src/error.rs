//! Error types for the Python sandbox.
//!
//! Only setup can fail with these. Running code never produces an `Err`:
//! compile violations, runtime faults and timeouts are all reported through
//! [`ExecutionResult`](crate::sandbox::executor::ExecutionResult).

use thiserror::Error;

/// Errors that can occur while setting up a sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[source] anyhow::Error),

    /// The worker thread could not be started.
    #[error("failed to start worker: {0}")]
    WorkerSpawn(#[source] anyhow::Error),

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Check if this error came from configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, SandboxError::Config(_) | SandboxError::ConfigParse(_))
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SandboxError::Config("timeout must be greater than zero".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: timeout must be greater than zero"
        );
        assert!(err.is_config());

        let spawn = SandboxError::WorkerSpawn(anyhow::anyhow!("out of threads"));
        assert_eq!(spawn.to_string(), "failed to start worker: out of threads");
        assert!(!spawn.is_config());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "sandbox.toml");
        let err: SandboxError = io.into();
        assert!(matches!(err, SandboxError::Io(_)));
    }
}
