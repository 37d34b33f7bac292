//! Turning chat messages into sandbox runs and replies.
//!
//! Run with: cargo run --example chat_replies

use std::time::Duration;
use restricted_python_sandbox::chat::{extract_code, format_amount, format_reply, SubscriberSet};
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

    let sandbox = PythonSandbox::new(
        SandboxConfig::builder()
            .timeout(Duration::from_secs(5))
            .build(),
    )?;

    let messages = [
        "```python\nfor i in range(3):\n    print('<b>', i)\n```",
        "`2 + 2`",
        "x = [1, 2, 3]\nprint(sum(x) / len(x))",
        "import os",
        "good morning everyone",
    ];

    for message in messages {
        println!(">>> {:?}", message);
        match extract_code(message) {
            Some(code) => {
                let result = sandbox.execute(&code).await;
                println!("{}\n", format_reply(&result));
            }
            None => println!("(not code, ignored)\n"),
        }
    }

    let mut subscribers = SubscriberSet::new();
    subscribers.subscribe(1001);
    subscribers.subscribe(1002);
    subscribers.unsubscribe(1001);
    for chat_id in subscribers.ids() {
        println!(
            "notify {}: {} tokens left",
            chat_id,
            format_amount(1_234_567.0)
        );
    }

    Ok(())
}
