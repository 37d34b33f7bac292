//! Core execution engine for the Python sandbox.
//!
//! Each call compiles the source, then runs it on a dedicated worker thread
//! with fresh output sinks and a fresh module scope. The worker polls an
//! [`ExecutionLimiter`]; the caller waits at most `timeout + grace` for its
//! reply and disarms the limiter on every exit path.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::compiler::{CompiledUnit, Compiler};
use crate::error::{Result, SandboxError};
use crate::runtime::environment::CapabilitySet;
use crate::runtime::fault::{FaultKind, Unwind};
use crate::runtime::interpreter::Interpreter;
use crate::sandbox::cache::global_cache;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::SandboxIo;
use crate::sandbox::limits::{ExecutionLimiter, ResourceLimits};

/// Result of a Python execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Whether the program ran to completion without a fault.
    pub success: bool,
    /// Captured stdout. Empty unless `success`.
    pub output: String,
    /// `"<Kind>: <message>"`, the violation list, or the stderr text.
    /// Empty when `success`.
    pub error: String,
    pub metadata: ExecutionMetadata,
}

/// Details about how an execution went.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionMetadata {
    /// Wall-clock time from the call to the result.
    pub duration: Duration,
    /// Why the execution failed, if it did.
    pub fault: Option<FaultKind>,
    /// Whether either output stream hit its cap.
    pub output_truncated: bool,
    /// Deepest user function nesting reached.
    pub peak_depth: usize,
}

impl ExecutionResult {
    /// Check if the execution was successful.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The fault tag, if the execution failed.
    pub fn fault(&self) -> Option<FaultKind> {
        self.metadata.fault
    }

    fn succeeded(output: String, metadata: ExecutionMetadata) -> Self {
        Self {
            success: true,
            output,
            error: String::new(),
            metadata,
        }
    }

    fn failed(fault: FaultKind, error: String, mut metadata: ExecutionMetadata) -> Self {
        metadata.fault = Some(fault);
        Self {
            success: false,
            output: String::new(),
            error,
            metadata,
        }
    }
}

/// How a sandbox obtains its capability environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxOptions {
    /// Share environments through the process-wide cache.
    pub use_cache: bool,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

impl SandboxOptions {
    /// Build a private environment instead of using the global cache.
    pub fn uncached() -> Self {
        Self { use_cache: false }
    }
}

/// What the worker thread sends back. Everything in it is `Send`; runtime
/// values never leave the worker.
#[derive(Debug)]
struct WorkerReport {
    outcome: Outcome,
    stdout: String,
    stderr: String,
    truncated: bool,
    peak_depth: usize,
}

#[derive(Debug)]
enum Outcome {
    Completed,
    Raised { fault: FaultKind, message: String, line: u32 },
    Interrupted,
    Panicked(String),
}

/// A sandboxed Python execution environment.
///
/// Cheap to share: wrap it in an `Arc` and call it from as many tasks as
/// needed. Calls never share mutable state.
#[derive(Debug)]
pub struct PythonSandbox {
    config: SandboxConfig,
    compiler: Compiler,
    capabilities: Arc<CapabilitySet>,
    limits: ResourceLimits,
}

impl PythonSandbox {
    /// Create a new Python sandbox with the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        Self::with_options(config, SandboxOptions::default())
    }

    /// Create a sandbox, choosing whether to share the capability
    /// environment through the global cache.
    pub fn with_options(config: SandboxConfig, options: SandboxOptions) -> Result<Self> {
        config.validate()?;
        let capabilities = if options.use_cache {
            global_cache().get_or_build(&config.allowed_modules)
        } else {
            Arc::new(CapabilitySet::build(&config.allowed_modules))
        };
        Self::with_capabilities(config, capabilities)
    }

    /// Create a sandbox around an existing environment.
    pub fn with_capabilities(config: SandboxConfig, capabilities: Arc<CapabilitySet>) -> Result<Self> {
        config.validate()?;
        let compiler = Compiler::new(&config.allowed_modules, config.max_nesting_depth);
        let limits = ResourceLimits::from_config(&config);
        Ok(Self {
            config,
            compiler,
            capabilities,
            limits,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The namespace visible to executed code.
    pub fn capabilities(&self) -> &Arc<CapabilitySet> {
        &self.capabilities
    }

    /// Execute Python code with the configured timeout.
    pub async fn execute(&self, source: &str) -> ExecutionResult {
        self.execute_with_timeout(source, self.config.timeout).await
    }

    /// Execute Python code with an explicit timeout.
    pub async fn execute_with_timeout(&self, source: &str, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        let unit = match self.compile(source, started) {
            Ok(unit) => unit,
            Err(rejected) => return rejected,
        };

        let limiter = ExecutionLimiter::new(timeout);
        // Dropping the guard cancels the worker, even if this future is
        // dropped while awaiting.
        let _guard = limiter.guard();
        let (tx, rx) = tokio::sync::oneshot::channel();
        if let Err(e) = self.spawn_worker(unit, limiter, move |report| {
            let _ = tx.send(report);
        }) {
            return self.spawn_failure(e, started);
        }

        let report = match tokio::time::timeout(timeout.saturating_add(self.config.timeout_grace), rx).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(_)) => Some(WorkerReport::lost()),
            Err(_) => None,
        };
        self.decide(report, timeout, started)
    }

    /// Execute Python code with the configured timeout, blocking the
    /// calling thread.
    pub fn execute_blocking(&self, source: &str) -> ExecutionResult {
        self.execute_blocking_with_timeout(source, self.config.timeout)
    }

    /// Blocking variant of [`execute_with_timeout`](Self::execute_with_timeout).
    pub fn execute_blocking_with_timeout(&self, source: &str, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        let unit = match self.compile(source, started) {
            Ok(unit) => unit,
            Err(rejected) => return rejected,
        };

        let limiter = ExecutionLimiter::new(timeout);
        let _guard = limiter.guard();
        let (tx, rx) = std::sync::mpsc::channel();
        if let Err(e) = self.spawn_worker(unit, limiter, move |report| {
            let _ = tx.send(report);
        }) {
            return self.spawn_failure(e, started);
        }

        let report = match rx.recv_timeout(timeout.saturating_add(self.config.timeout_grace)) {
            Ok(report) => Some(report),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Some(WorkerReport::lost()),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => None,
        };
        self.decide(report, timeout, started)
    }

    fn compile(&self, source: &str, started: Instant) -> std::result::Result<CompiledUnit, ExecutionResult> {
        self.compiler.compile(source).map_err(|violations| {
            tracing::debug!(count = violations.len(), "source rejected");
            ExecutionResult::failed(
                FaultKind::Violation,
                violations.to_string(),
                ExecutionMetadata {
                    duration: started.elapsed(),
                    ..ExecutionMetadata::default()
                },
            )
        })
    }

    /// Starts the worker thread. `reply` is called exactly once with the
    /// report, unless the thread could not be started.
    fn spawn_worker<F>(&self, unit: CompiledUnit, limiter: ExecutionLimiter, reply: F) -> Result<()>
    where
        F: FnOnce(WorkerReport) + Send + 'static,
    {
        let capabilities = Arc::clone(&self.capabilities);
        let limits = self.limits;
        let max_output_bytes = self.config.max_output_bytes;
        tracing::debug!(statements = unit.len(), timeout = ?limiter.timeout(), "starting worker");

        std::thread::Builder::new()
            .name("python-sandbox-worker".to_string())
            .stack_size(self.config.worker_stack_size)
            .spawn(move || {
                let report = run_unit(&unit, capabilities, limiter, limits, max_output_bytes);
                reply(report);
            })
            .map(|_| ())
            .map_err(|e| SandboxError::WorkerSpawn(anyhow::Error::new(e)))
    }

    fn spawn_failure(&self, err: SandboxError, started: Instant) -> ExecutionResult {
        tracing::error!(error = %err, "could not start sandbox worker");
        ExecutionResult::failed(
            FaultKind::Internal,
            format!("RuntimeError: {}", err),
            ExecutionMetadata {
                duration: started.elapsed(),
                ..ExecutionMetadata::default()
            },
        )
    }

    /// Turns the worker's report (or its absence) into the caller-facing
    /// result.
    fn decide(&self, report: Option<WorkerReport>, timeout: Duration, started: Instant) -> ExecutionResult {
        let timed_out = || {
            format!(
                "TimeoutError: code execution timed out after {} seconds",
                timeout.as_secs_f64()
            )
        };

        let Some(report) = report else {
            tracing::warn!(?timeout, "worker did not answer within the grace period");
            return ExecutionResult::failed(
                FaultKind::Timeout,
                timed_out(),
                ExecutionMetadata {
                    duration: started.elapsed(),
                    ..ExecutionMetadata::default()
                },
            );
        };

        let metadata = ExecutionMetadata {
            duration: started.elapsed(),
            fault: None,
            output_truncated: report.truncated,
            peak_depth: report.peak_depth,
        };
        match report.outcome {
            Outcome::Completed if report.stderr.is_empty() => {
                tracing::debug!(duration = ?metadata.duration, "execution completed");
                ExecutionResult::succeeded(report.stdout, metadata)
            }
            Outcome::Completed => {
                tracing::debug!("execution wrote to stderr");
                ExecutionResult::failed(FaultKind::StderrNonEmpty, report.stderr, metadata)
            }
            Outcome::Raised { fault, message, line } => {
                tracing::debug!(%fault, line, "execution raised");
                ExecutionResult::failed(fault, message, metadata)
            }
            Outcome::Interrupted => {
                tracing::warn!(?timeout, "execution timed out");
                ExecutionResult::failed(FaultKind::Timeout, timed_out(), metadata)
            }
            Outcome::Panicked(detail) => {
                tracing::error!(%detail, "sandbox worker failed");
                ExecutionResult::failed(FaultKind::Internal, format!("RuntimeError: {}", detail), metadata)
            }
        }
    }
}

impl WorkerReport {
    /// The worker went away without replying.
    fn lost() -> Self {
        Self {
            outcome: Outcome::Panicked("worker exited without a result".to_string()),
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            peak_depth: 0,
        }
    }
}

/// Runs a unit to completion on the current (worker) thread.
fn run_unit(
    unit: &CompiledUnit,
    capabilities: Arc<CapabilitySet>,
    limiter: ExecutionLimiter,
    limits: ResourceLimits,
    max_output_bytes: usize,
) -> WorkerReport {
    let io = SandboxIo::new(max_output_bytes);
    let sinks = io.clone();

    let run = panic::catch_unwind(AssertUnwindSafe(move || {
        let mut interp = Interpreter::new(capabilities, sinks, limiter, limits);
        let outcome = match interp.run(unit) {
            Ok(()) => Outcome::Completed,
            Err(Unwind::Raise(exc)) => Outcome::Raised {
                fault: FaultKind::of_exception(exc.kind),
                message: exc.to_string(),
                line: interp.current_line(),
            },
            Err(Unwind::Interrupted) => Outcome::Interrupted,
        };
        (outcome, interp.peak_depth())
    }));

    let (outcome, peak_depth) = match run {
        Ok(finished) => finished,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "interpreter panicked".to_string());
            (Outcome::Panicked(detail), 0)
        }
    };

    WorkerReport {
        outcome,
        stdout: io.stdout_str(),
        stderr: io.stderr_str(),
        truncated: io.truncated(),
        peak_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> PythonSandbox {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(5))
            .build();
        PythonSandbox::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_simple_execution() {
        let result = sandbox().execute("print(1 + 1)").await;

        assert!(result.is_success());
        assert_eq!(result.output, "2\n");
        assert!(result.error.is_empty());
        assert_eq!(result.fault(), None);
    }

    #[tokio::test]
    async fn test_timeout() {
        let started = Instant::now();
        let result = sandbox()
            .execute_with_timeout("while True: pass", Duration::from_millis(100))
            .await;

        assert!(!result.success);
        assert_eq!(result.fault(), Some(FaultKind::Timeout));
        assert_eq!(
            result.error,
            "TimeoutError: code execution timed out after 0.1 seconds"
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_blocking_execution() {
        let result = sandbox().execute_blocking("x = [i * i for i in range(4)]\nprint(sum(x))");
        assert_eq!(result.output, "14\n");
    }

    #[test]
    fn test_stderr_counts_as_failure() {
        let result = sandbox().execute_blocking("import sys\nprint('ok')\nprint('warn', file=sys.stderr)");
        assert!(!result.success);
        assert_eq!(result.error, "warn\n");
        assert!(result.output.is_empty());
        assert_eq!(result.fault(), Some(FaultKind::StderrNonEmpty));
    }

    #[test]
    fn test_violation_skips_worker() {
        let result = sandbox().execute_blocking("import os\nos.system('ls')");
        assert_eq!(result.fault(), Some(FaultKind::Violation));
        assert!(result.error.contains("\"os\""));
        assert_eq!(result.metadata.peak_depth, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SandboxConfig::builder().timeout(Duration::ZERO).build();
        assert!(PythonSandbox::new(config).is_err());
    }

    #[test]
    fn test_small_stack_is_rejected_up_front() {
        let config = SandboxConfig::builder().worker_stack_size(128 * 1024).build();
        let capabilities = Arc::new(CapabilitySet::build(&config.allowed_modules));
        assert!(matches!(
            PythonSandbox::with_capabilities(config.clone(), capabilities),
            Err(SandboxError::Config(_))
        ));
        assert!(PythonSandbox::new(config).is_err());
    }

    #[test]
    fn test_unbounded_timeout_does_not_panic() {
        let sandbox = sandbox();
        let result = sandbox.execute_blocking_with_timeout("print(1)", Duration::MAX);
        assert!(result.success, "{}", result.error);
        assert_eq!(result.output, "1\n");

        let result = tokio_test::block_on(sandbox.execute_with_timeout("print(2)", Duration::MAX));
        assert!(result.success, "{}", result.error);
        assert_eq!(result.output, "2\n");
    }

    #[test]
    fn test_large_grace_does_not_panic() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(5))
            .timeout_grace(Duration::MAX)
            .build();
        let sandbox = PythonSandbox::new(config).unwrap();
        let result = tokio_test::block_on(sandbox.execute("print('ok')"));
        assert_eq!(result.output, "ok\n");
    }

    #[test]
    fn test_sandbox_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PythonSandbox>();
    }
}
