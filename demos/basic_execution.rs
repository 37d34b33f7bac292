//! Basic example of executing Python code in the sandbox.
//!
//! Run with: cargo run --example basic_execution
//!
//! Set `RUST_LOG=restricted_python_sandbox=debug` to watch the compile and
//! execute lifecycle.

use std::time::Duration;
use restricted_python_sandbox::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("restricted_python_sandbox=info")),
        )
        .init();

    // Configure the sandbox
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .build();

    println!("Creating sandbox with config: {:?}", config);
    let sandbox = PythonSandbox::new(config)?;

    // Execute simple arithmetic
    println!("\n=== Test 1: Simple arithmetic ===");
    let result = sandbox.execute("print(1 + 1)").await;
    println!("success: {}", result.success);
    println!("output: {}", result.output);
    println!("duration: {:?}", result.metadata.duration);

    // Execute with a loop
    println!("\n=== Test 2: Loop execution ===");
    let code = r#"
for i in range(5):
    print(f"Count: {i}")
"#;
    let result = sandbox.execute(code).await;
    println!("output:\n{}", result.output);

    // Functions, comprehensions and an allowed module
    println!("\n=== Test 3: Functions and modules ===");
    let code = r#"
import math

def hypot(a, b):
    return math.sqrt(a ** 2 + b ** 2)

triples = [(a, b, int(hypot(a, b))) for a in range(1, 20) for b in range(a, 20)
           if hypot(a, b).is_integer()]
print(triples)
"#;
    let result = sandbox.execute(code).await;
    println!("output:\n{}", result.output);

    // Test error handling
    println!("\n=== Test 4: Python error ===");
    let result = sandbox.execute("raise ValueError('test error')").await;
    println!("error: {}", result.error);
    println!("fault: {:?}", result.fault());

    Ok(())
}
