//! Sandbox configuration with builder pattern.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SandboxError};
use crate::sandbox::limits::MIN_WORKER_STACK_SIZE;

/// Modules bound when the configuration does not name any.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &["math", "random", "string", "json", "sys"];

/// Configuration for the Python sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Maximum wall-clock execution time before timeout.
    pub timeout: Duration,
    /// Modules the program may import (and reference directly).
    pub allowed_modules: Vec<String>,
    /// Maximum nested user function calls.
    pub max_recursion_depth: usize,
    /// Maximum length of a materialized string, list, dict or set.
    pub max_sequence_len: usize,
    /// Bytes kept per output stream; the rest is dropped.
    pub max_output_bytes: usize,
    /// Maximum nesting of blocks and expressions accepted by the compiler.
    pub max_nesting_depth: usize,
    /// Stack size of the worker thread.
    pub worker_stack_size: usize,
    /// Extra time the caller waits for the worker after the deadline.
    pub timeout_grace: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            allowed_modules: DEFAULT_ALLOWED_MODULES.iter().map(|m| m.to_string()).collect(),
            max_recursion_depth: 200,
            max_sequence_len: 10_000_000,
            max_output_bytes: 1024 * 1024, // 1MB
            max_nesting_depth: 100,
            worker_stack_size: 64 * 1024 * 1024, // 64MB
            timeout_grace: Duration::from_millis(500),
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Rejects configurations that could never run anything.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(SandboxError::Config("timeout must be greater than zero".into()));
        }
        let limits = [
            ("max_recursion_depth", self.max_recursion_depth),
            ("max_sequence_len", self.max_sequence_len),
            ("max_output_bytes", self.max_output_bytes),
            ("max_nesting_depth", self.max_nesting_depth),
            ("worker_stack_size", self.worker_stack_size),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(SandboxError::Config(format!("{} must be greater than zero", name)));
        }
        if self.worker_stack_size < MIN_WORKER_STACK_SIZE {
            return Err(SandboxError::Config(format!(
                "worker_stack_size must be at least {} bytes",
                MIN_WORKER_STACK_SIZE
            )));
        }
        Ok(())
    }

    /// Parses a TOML document. Keys are optional; durations are given as
    /// `timeout_ms` or `timeout_secs` (likewise `timeout_grace_*`).
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| SandboxError::ConfigParse(anyhow::Error::new(e)))?;
        let config = file.into_builder()?.build();
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// On-disk shape of the configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    timeout_ms: Option<u64>,
    timeout_secs: Option<f64>,
    allowed_modules: Option<Vec<String>>,
    max_recursion_depth: Option<usize>,
    max_sequence_len: Option<usize>,
    max_output_bytes: Option<usize>,
    max_nesting_depth: Option<usize>,
    worker_stack_size: Option<usize>,
    timeout_grace_ms: Option<u64>,
    timeout_grace_secs: Option<f64>,
}

fn duration_from(name: &str, millis: Option<u64>, secs: Option<f64>) -> Result<Option<Duration>> {
    match (millis, secs) {
        (Some(_), Some(_)) => Err(SandboxError::Config(format!(
            "give either {0}_ms or {0}_secs, not both",
            name
        ))),
        (Some(ms), None) => Ok(Some(Duration::from_millis(ms))),
        (None, Some(secs)) => Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| SandboxError::Config(format!("invalid {}_secs: {}", name, e))),
        (None, None) => Ok(None),
    }
}

impl ConfigFile {
    fn into_builder(self) -> Result<SandboxConfigBuilder> {
        Ok(SandboxConfigBuilder {
            timeout: duration_from("timeout", self.timeout_ms, self.timeout_secs)?,
            allowed_modules: self.allowed_modules,
            max_recursion_depth: self.max_recursion_depth,
            max_sequence_len: self.max_sequence_len,
            max_output_bytes: self.max_output_bytes,
            max_nesting_depth: self.max_nesting_depth,
            worker_stack_size: self.worker_stack_size,
            timeout_grace: duration_from(
                "timeout_grace",
                self.timeout_grace_ms,
                self.timeout_grace_secs,
            )?,
        })
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    timeout: Option<Duration>,
    allowed_modules: Option<Vec<String>>,
    max_recursion_depth: Option<usize>,
    max_sequence_len: Option<usize>,
    max_output_bytes: Option<usize>,
    max_nesting_depth: Option<usize>,
    worker_stack_size: Option<usize>,
    timeout_grace: Option<Duration>,
}

impl SandboxConfigBuilder {
    /// Set the maximum execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the allowed module list.
    pub fn allowed_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = Some(depth);
        self
    }

    pub fn max_sequence_len(mut self, len: usize) -> Self {
        self.max_sequence_len = Some(len);
        self
    }

    /// Set the per-stream output cap in bytes.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = Some(depth);
        self
    }

    /// Set the worker thread's stack size in bytes.
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    pub fn timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = Some(grace);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            timeout: self.timeout.unwrap_or(default.timeout),
            allowed_modules: self.allowed_modules.unwrap_or(default.allowed_modules),
            max_recursion_depth: self.max_recursion_depth.unwrap_or(default.max_recursion_depth),
            max_sequence_len: self.max_sequence_len.unwrap_or(default.max_sequence_len),
            max_output_bytes: self.max_output_bytes.unwrap_or(default.max_output_bytes),
            max_nesting_depth: self.max_nesting_depth.unwrap_or(default.max_nesting_depth),
            worker_stack_size: self.worker_stack_size.unwrap_or(default.worker_stack_size),
            timeout_grace: self.timeout_grace.unwrap_or(default.timeout_grace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_recursion_depth, 200);
        assert_eq!(config.allowed_modules, ["math", "random", "string", "json", "sys"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(5))
            .allowed_modules(["math"])
            .max_output_bytes(4096)
            .build();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.allowed_modules, vec!["math".to_string()]);
        assert_eq!(config.max_output_bytes, 4096);
        assert_eq!(config.max_sequence_len, 10_000_000);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let zero_timeout = SandboxConfig::builder().timeout(Duration::ZERO).build();
        assert!(matches!(zero_timeout.validate(), Err(SandboxError::Config(_))));

        let zero_depth = SandboxConfig::builder().max_recursion_depth(0).build();
        let err = zero_depth.validate().unwrap_err();
        assert!(err.to_string().contains("max_recursion_depth"));
    }

    #[test]
    fn test_validate_rejects_small_stacks() {
        let small = SandboxConfig::builder().worker_stack_size(128 * 1024).build();
        let err = small.validate().unwrap_err();
        assert!(err.to_string().contains("worker_stack_size must be at least"), "{}", err);

        let smallest = SandboxConfig::builder()
            .worker_stack_size(MIN_WORKER_STACK_SIZE)
            .build();
        assert!(smallest.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = SandboxConfig::from_toml_str(
            r#"
timeout_secs = 2.5
allowed_modules = ["math", "json"]
max_output_bytes = 2048
timeout_grace_ms = 100
"#,
        )
        .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.allowed_modules, ["math", "json"]);
        assert_eq!(config.max_output_bytes, 2048);
        assert_eq!(config.timeout_grace, Duration::from_millis(100));

        let empty = SandboxConfig::from_toml_str("").unwrap();
        assert_eq!(empty, SandboxConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_input() {
        assert!(matches!(
            SandboxConfig::from_toml_str("timeout_ms = 10\ntimeout_secs = 1.0"),
            Err(SandboxError::Config(_))
        ));
        assert!(matches!(
            SandboxConfig::from_toml_str("unknown_key = 1"),
            Err(SandboxError::ConfigParse(_))
        ));
        assert!(matches!(
            SandboxConfig::from_toml_str("timeout_ms = 0"),
            Err(SandboxError::Config(_))
        ));
    }
}
