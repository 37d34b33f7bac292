//! Example of concurrent Python code execution with one shared sandbox.
//!
//! A `PythonSandbox` holds no per-call state, so a single instance behind an
//! `Arc` serves every task. Each call still gets its own worker thread,
//! globals and output capture.
//!
//! Run with: cargo run --example concurrent_execution

use std::sync::Arc;
use std::time::{Duration, Instant};
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

    println!("=== Concurrent Execution Example ===\n");

    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(2))
        .build();
    let sandbox = Arc::new(PythonSandbox::new(config)?);

    // Define some Python tasks to run concurrently
    let tasks = vec![
        (
            "Task 1",
            "sum([i**2 for i in range(100)])",
            "Sum of squares",
        ),
        (
            "Task 2",
            "len([x for x in range(1000) if x % 3 == 0])",
            "Count divisible by 3",
        ),
        (
            "Task 3",
            "''.join([chr(65 + i % 26) for i in range(50)])",
            "Generate letters",
        ),
        (
            "Task 4",
            "max([i * (100 - i) for i in range(101)])",
            "Maximum product",
        ),
    ];

    println!("Starting {} concurrent tasks plus one runaway loop...\n", tasks.len());
    let start = Instant::now();

    // The runaway task times out without holding up the others.
    let runaway = {
        let sandbox = Arc::clone(&sandbox);
        tokio::spawn(async move { sandbox.execute("while True: pass").await })
    };

    // Spawn all tasks concurrently
    let mut handles = Vec::new();
    for (name, code, description) in tasks {
        let sandbox = Arc::clone(&sandbox);
        let handle = tokio::spawn(async move {
            // Wrap code to print result
            let full_code = format!("print({})", code);
            let result = sandbox.execute(&full_code).await;
            (name, description, result)
        });
        handles.push(handle);
    }

    // Collect results
    println!("Results:");
    println!("{:-<60}", "");
    for handle in handles {
        match handle.await {
            Ok((name, description, result)) if result.success => {
                println!(
                    "{}: {} = {} (took {:?})",
                    name,
                    description,
                    result.output.trim(),
                    result.metadata.duration
                );
            }
            Ok((name, _, result)) => {
                println!("{}: failed: {}", name, result.error);
            }
            Err(e) => {
                println!("Join error: {}", e);
            }
        }
    }
    println!("{:-<60}", "");

    match runaway.await {
        Ok(result) => println!("Runaway loop: {} ({:?})", result.error, result.fault()),
        Err(e) => println!("Join error: {}", e),
    }

    let total_time = start.elapsed();
    println!("\nTotal wall-clock time: {:?}", total_time);
    println!("(Tasks ran concurrently, so total time < sum of individual times)");

    Ok(())
}
