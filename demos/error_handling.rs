//! Example demonstrating error handling patterns.
//!
//! Running code never returns an `Err`. Every failure comes back as an
//! `ExecutionResult` with a fault tag:
//! - Rejected source (violations)
//! - Undefined names
//! - Python exceptions
//! - Timeouts
//! - Output on stderr
//!
//! Only setup (configuration) can fail with a `SandboxError`.
//!
//! Run with: cargo run --example error_handling

use std::time::Duration;
use restricted_python_sandbox::prelude::*;
use tracing_subscriber::EnvFilter;

fn describe(title: &str, result: &ExecutionResult) {
    println!("--- {} ---", title);
    match result.fault() {
        None => println!("ok, output: {:?}", result.output),
        Some(FaultKind::Violation) => {
            println!("rejected before running:");
            for line in result.error.lines() {
                println!("  {}", line);
            }
        }
        Some(FaultKind::Timeout) => println!("gave up: {}", result.error),
        Some(fault) => println!("{} fault: {}", fault, result.error),
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("restricted_python_sandbox=warn")),
        )
        .init();

    println!("=== Error Handling Example ===\n");

    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(1))
        .build();
    let sandbox = PythonSandbox::new(config)?;

    let result = sandbox.execute("int('not a number')").await;
    describe("Python ValueError", &result);

    let result = sandbox.execute("import os\nprint(open('/etc/passwd').read())").await;
    describe("Forbidden import and builtin", &result);

    let result = sandbox.execute("print(undefined_name)").await;
    describe("Undefined name", &result);

    let code = r#"
try:
    {}['missing']
except KeyError as e:
    print('handled', e)
"#;
    let result = sandbox.execute(code).await;
    describe("Exception caught inside the program", &result);

    let result = sandbox.execute("while True:\n    pass").await;
    describe("Infinite loop", &result);

    let result = sandbox.execute("import sys\nprint('warning', file=sys.stderr)").await;
    describe("Output on stderr", &result);

    // Configuration errors are the only `Err` values.
    println!("--- Invalid configuration ---");
    let bad = SandboxConfig::builder().timeout(Duration::ZERO).build();
    match PythonSandbox::new(bad) {
        Ok(_) => println!("unexpectedly accepted"),
        Err(e) => println!("setup failed (config error: {}): {}", e.is_config(), e),
    }

    match SandboxConfig::from_toml_str("timeout_ms = \"soon\"") {
        Ok(_) => println!("unexpectedly parsed"),
        Err(e) => println!("setup failed: {}", e),
    }

    Ok(())
}
