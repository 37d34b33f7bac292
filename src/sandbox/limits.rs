//! Deadline enforcement and resource limits for a single execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sandbox::config::SandboxConfig;

/// Approximate stack consumed per nested statement or expression
/// evaluation, used to derive the evaluation depth limit from the worker
/// stack size.
pub const STACK_BYTES_PER_EVAL_LEVEL: usize = 16 * 1024;

/// Stack kept back for the worker's own frames outside evaluation.
const STACK_RESERVE_BYTES: usize = 256 * 1024;

/// Smallest worker stack a configuration may ask for: room for 256
/// evaluation levels.
pub const MIN_WORKER_STACK_SIZE: usize = 256 * STACK_BYTES_PER_EVAL_LEVEL;

/// Cooperative deadline shared between the caller and the worker.
///
/// The interpreter polls it while running; the caller (or the drop guard)
/// cancels it to stop the worker at its next check.
#[derive(Debug, Clone)]
pub struct ExecutionLimiter {
    state: Arc<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    timeout: Duration,
    deadline: Instant,
    cancelled: AtomicBool,
}

impl ExecutionLimiter {
    /// Arm a deadline `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: Arc::new(LimiterState {
                timeout,
                deadline: now.checked_add(timeout).unwrap_or(now + Duration::from_secs(86_400)),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.state.timeout
    }

    /// Stop the run at the next check.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Whether the deadline has passed.
    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.state.deadline
    }

    /// Whether the run should stop now, either way.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.deadline_passed()
    }

    /// A guard that cancels the limiter when dropped, so the worker is
    /// disarmed on every exit path of the caller.
    pub fn guard(&self) -> DeadlineGuard {
        DeadlineGuard {
            limiter: self.clone(),
        }
    }
}

/// Cancels its limiter on drop.
#[derive(Debug)]
pub struct DeadlineGuard {
    limiter: ExecutionLimiter,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.limiter.cancel();
    }
}

/// Per-call limits enforced by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum nested user function calls.
    pub max_recursion_depth: usize,
    /// Maximum length of a materialized string, list, dict or set.
    pub max_sequence_len: usize,
    /// Maximum nested statement and expression evaluations, derived from
    /// the worker stack size.
    pub max_eval_depth: usize,
}

impl ResourceLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            max_recursion_depth: config.max_recursion_depth,
            max_sequence_len: config.max_sequence_len,
            max_eval_depth: config.worker_stack_size.saturating_sub(STACK_RESERVE_BYTES)
                / STACK_BYTES_PER_EVAL_LEVEL,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_expires() {
        let limiter = ExecutionLimiter::new(Duration::from_millis(10));
        assert!(!limiter.should_stop());
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.deadline_passed());
        assert!(limiter.should_stop());
        assert!(!limiter.is_cancelled());
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let limiter = ExecutionLimiter::new(Duration::from_secs(60));
        {
            let _guard = limiter.guard();
            assert!(!limiter.is_cancelled());
        }
        assert!(limiter.is_cancelled());
        assert!(limiter.should_stop());
    }

    #[test]
    fn test_limits_follow_stack_size() {
        let config = SandboxConfig::builder()
            .worker_stack_size(32 * 1024 * 1024)
            .max_recursion_depth(50)
            .build();
        let limits = ResourceLimits::from_config(&config);
        assert_eq!(limits.max_recursion_depth, 50);
        assert_eq!(limits.max_eval_depth, 2032);
    }

    #[test]
    fn test_eval_depth_never_exceeds_the_stack() {
        for stack in [128 * 1024, 512 * 1024, MIN_WORKER_STACK_SIZE, 64 * 1024 * 1024] {
            let config = SandboxConfig::builder().worker_stack_size(stack).build();
            let limits = ResourceLimits::from_config(&config);
            assert!(
                limits.max_eval_depth * STACK_BYTES_PER_EVAL_LEVEL <= stack,
                "{} levels on a {} byte stack",
                limits.max_eval_depth,
                stack
            );
        }
    }
}
