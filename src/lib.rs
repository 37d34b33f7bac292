//! # Restricted Python Sandbox
//!
//! Runs untrusted snippets of a Python subset and reports what they printed
//! or why they failed, without giving them any authority over the host.
//!
//! Every submission passes through three stages:
//!
//! - **Restricted compiler**: parses the source under a reduced grammar and
//!   rejects forbidden names, dunder attributes and unlisted imports before
//!   anything runs
//! - **Capability environment**: the only names a program can reach are the
//!   safe builtins, the exception types and the allow-listed modules
//! - **Bounded executor**: runs the unit on a dedicated worker thread under
//!   a wall-clock deadline, with capped output capture and recursion limits
//!
//! ## Example
//!
//! ```rust,no_run
//! use restricted_python_sandbox::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .timeout(Duration::from_secs(5))
//!         .build();
//!
//!     let sandbox = PythonSandbox::new(config)?;
//!     let result = sandbox.execute("print(1 + 1)").await;
//!
//!     assert_eq!(result.output, "2\n");
//!     assert!(result.is_success());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! Isolation is language-level only:
//!
//! 1. **No ambient namespace**: there is no fallback to a broader builtin
//!    table, so `open`, `eval`, `exec` and `__import__` simply do not exist
//! 2. **Static rejection**: names and attributes starting with `_` and
//!    imports outside the allow-list never compile
//! 3. **Resource limits**: deadline, recursion depth, sequence length and
//!    output size are all bounded
//! 4. **Cooperative cancellation**: the evaluator polls an atomic flag, so
//!    even `while True: pass` stops at the deadline

pub mod chat;
pub mod compiler;
pub mod error;
pub mod prelude;
pub mod runtime;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use compiler::{CompiledUnit, Compiler, Violation, Violations};
pub use error::{Result, SandboxError};
pub use runtime::{CapabilitySet, FaultKind};
pub use sandbox::cache::{global_cache, EnvironmentCache};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::{ExecutionMetadata, ExecutionResult, PythonSandbox, SandboxOptions};
