//! End-to-end behavior of the executor: results, faults, timeouts and
//! concurrency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use restricted_python_sandbox::prelude::*;
use restricted_python_sandbox::{global_cache, SandboxOptions};

fn sandbox() -> PythonSandbox {
    PythonSandbox::new(SandboxConfig::default()).unwrap()
}

#[tokio::test]
async fn test_hello_world() {
    let result = sandbox().execute("print('Hello, World!')").await;
    assert!(result.success);
    assert_eq!(result.output, "Hello, World!\n");
    assert!(result.error.is_empty());
    assert_eq!(result.fault(), None);
}

#[tokio::test]
async fn test_expression_without_output() {
    let result = sandbox().execute("2 + 2").await;
    assert!(result.success);
    assert_eq!(result.output, "");
    assert!(result.error.is_empty());

    let empty = sandbox().execute("").await;
    assert!(empty.success);
    assert_eq!(empty.output, "");
}

#[tokio::test]
async fn test_zero_division() {
    let result = sandbox().execute("print('partial')\n1/0").await;
    assert!(!result.success);
    assert_eq!(result.fault(), Some(FaultKind::Runtime));
    assert_eq!(result.error, "ZeroDivisionError: division by zero");
    assert_eq!(result.output, "", "output is discarded on failure");
}

#[tokio::test]
async fn test_user_raised_exception() {
    let result = sandbox()
        .execute("def check(x):\n    if x < 0:\n        raise ValueError(f'negative: {x}')\n    return x\ncheck(-3)")
        .await;
    assert_eq!(result.error, "ValueError: negative: -3");
    assert_eq!(result.fault(), Some(FaultKind::Runtime));
}

#[tokio::test]
async fn test_undefined_names() {
    let result = sandbox().execute("print(undefined_thing)").await;
    assert_eq!(result.fault(), Some(FaultKind::UndefinedName));
    assert_eq!(result.error, "NameError: name 'undefined_thing' is not defined");

    let result = sandbox()
        .execute("x = 1\ndef f():\n    print(x)\n    x = 2\nf()")
        .await;
    assert_eq!(result.fault(), Some(FaultKind::UndefinedName));
    assert!(result.error.starts_with("UnboundLocalError:"));
}

#[tokio::test]
async fn test_stderr_output_is_a_failure() {
    let result = sandbox()
        .execute("import sys\nprint('ok')\nprint('careful', file=sys.stderr)")
        .await;
    assert!(!result.success);
    assert_eq!(result.fault(), Some(FaultKind::StderrNonEmpty));
    assert_eq!(result.error, "careful\n");
    assert_eq!(result.output, "");
}

#[tokio::test]
async fn test_timeout_returns_promptly() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(1))
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let started = Instant::now();
    let result = sandbox.execute("while True:\n    pass").await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.fault(), Some(FaultKind::Timeout));
    assert_eq!(
        result.error,
        "TimeoutError: code execution timed out after 1 seconds"
    );
    assert!(elapsed >= Duration::from_millis(900), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
}

#[tokio::test]
async fn test_per_call_timeout_override() {
    let result = sandbox()
        .execute_with_timeout("x = 0\nwhile True:\n    x += 1", Duration::from_millis(200))
        .await;
    assert_eq!(result.fault(), Some(FaultKind::Timeout));
    assert!(result.error.contains("timed out after 0.2 seconds"));
}

#[tokio::test]
async fn test_idempotent_calls() {
    let sandbox = sandbox();
    let source = "\
words = ['pear', 'fig', 'apple', 'kiwi']
counts = {}
for w in words:
    counts[len(w)] = counts.get(len(w), 0) + 1
print(sorted(words, key=len), counts)
";
    let first = sandbox.execute(source).await;
    let second = sandbox.execute(source).await;
    assert!(first.success, "{}", first.error);
    assert_eq!(first.output, second.output);
    assert_eq!(first.output, "['fig', 'pear', 'kiwi', 'apple'] {4: 2, 3: 1, 5: 1}\n");
}

#[tokio::test]
async fn test_seeded_random_is_repeatable() {
    let sandbox = sandbox();
    let source = "import random\nrandom.seed(7)\nprint([random.randint(1, 100) for _ in range(5)])";
    let first = sandbox.execute(source).await;
    let second = sandbox.execute(source).await;
    assert!(first.success, "{}", first.error);
    assert_eq!(first.output, second.output);
}

#[tokio::test]
async fn test_allowed_modules() {
    let result = sandbox()
        .execute(
            "\
import math, json
from string import ascii_lowercase
print(math.sqrt(16), json.dumps({'k': [1, 2.5, None]}))
print(ascii_lowercase[:5])
",
        )
        .await;
    assert!(result.success, "{}", result.error);
    assert_eq!(result.output, "4.0 {\"k\": [1, 2.5, null]}\nabcde\n");
}

#[tokio::test]
async fn test_unresolved_allowed_module_is_a_name_error() {
    let config = SandboxConfig::builder()
        .allowed_modules(["math", "numpy"])
        .build();
    let sandbox = PythonSandbox::with_options(config, SandboxOptions::uncached()).unwrap();
    assert!(sandbox.capabilities().module("numpy").is_none());

    let result = sandbox.execute("import numpy\nprint(numpy.zeros(3))").await;
    assert!(!result.success);
    assert_eq!(result.fault(), Some(FaultKind::UndefinedName));
    assert_eq!(result.error, "NameError: name 'numpy' is not defined");

    let result = sandbox.execute("import json").await;
    assert_eq!(result.fault(), Some(FaultKind::Violation));
}

#[tokio::test]
async fn test_metadata() {
    let result = sandbox()
        .execute("def depth(n):\n    return 0 if n == 0 else 1 + depth(n - 1)\nprint(depth(10))")
        .await;
    assert!(result.success);
    assert_eq!(result.output, "10\n");
    assert!(result.metadata.peak_depth >= 11);
    assert!(!result.metadata.output_truncated);
    assert!(result.metadata.duration > Duration::ZERO);
}

#[tokio::test]
async fn test_integers_grow_past_64_bits() {
    let result = sandbox()
        .execute(
            "\
import math, json
print(2**100)
print(math.factorial(25))
big = 123456789012345678901234567890
print(big % 97, -big // 10**20, hex(1 << 70))
print(2**64 - 2**64 + 1, -9223372036854775808 - 1)
print(json.dumps([2**65]), json.loads('18446744073709551617') - 1)
print(f'{2**70:,}', round(2**70, -20), sum([2**62] * 4))
",
        )
        .await;
    assert!(result.success, "{}", result.error);
    assert_eq!(
        result.output,
        "1267650600228229401496703205376\n\
15511210043330985984000000\n\
52 -1234567891 0x400000000000000000\n\
1 -9223372036854775809\n\
[36893488147419103232] 18446744073709551616\n\
1,180,591,620,717,411,303,424 1200000000000000000000 18446744073709551616\n"
    );
}

#[tokio::test]
async fn test_huge_integers_are_a_memory_error() {
    let result = sandbox().execute("x = 10 ** 10_000_000").await;
    assert_eq!(result.fault(), Some(FaultKind::Runtime));
    assert!(result.error.starts_with("MemoryError"), "{}", result.error);

    let result = sandbox().execute("print([1, 2][2**64])").await;
    assert_eq!(
        result.error,
        "IndexError: cannot fit 'int' into an index-sized integer"
    );
}

#[tokio::test]
async fn test_iteration_stops_early() {
    let result = sandbox()
        .execute(
            "\
print(any(print(x) or x >= 1 for x in range(5)))
for i, x in enumerate(range(10**8)):
    if i > 3:
        break
print(i)
",
        )
        .await;
    assert!(result.success, "{}", result.error);
    assert_eq!(result.output, "0\n1\nTrue\n4\n");
}

#[tokio::test]
async fn test_concurrent_executions() {
    let sandbox = Arc::new(sandbox());
    let mut handles = Vec::new();
    for i in 0..8 {
        let sandbox = Arc::clone(&sandbox);
        handles.push(tokio::spawn(async move {
            let source = format!("value = {}\nprint(value * value)", i);
            (i, sandbox.execute(&source).await)
        }));
    }

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert!(result.success, "{}", result.error);
        assert_eq!(result.output, format!("{}\n", i * i));
    }
}

#[tokio::test]
async fn test_timeout_does_not_block_other_calls() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(500))
        .build();
    let sandbox = Arc::new(PythonSandbox::new(config).unwrap());

    let slow = {
        let sandbox = Arc::clone(&sandbox);
        tokio::spawn(async move { sandbox.execute("while True: pass").await })
    };
    let fast = sandbox.execute("print('still responsive')").await;
    assert_eq!(fast.output, "still responsive\n");

    let slow = slow.await.unwrap();
    assert_eq!(slow.fault(), Some(FaultKind::Timeout));
}

#[tokio::test]
async fn test_dropped_future_cancels_worker() {
    let sandbox = sandbox();
    let pending = sandbox.execute("while True: pass");
    let outcome = tokio::time::timeout(Duration::from_millis(100), pending).await;
    assert!(outcome.is_err(), "caller gave up first");

    // The next call is unaffected.
    let result = sandbox.execute("print(1)").await;
    assert_eq!(result.output, "1\n");
}

#[test]
fn test_blocking_api() {
    let sandbox = sandbox();
    let result = sandbox.execute_blocking("print(sum(range(101)))");
    assert!(result.success);
    assert_eq!(result.output, "5050\n");

    let result = sandbox.execute_blocking_with_timeout("while True: pass", Duration::from_millis(100));
    assert_eq!(result.fault(), Some(FaultKind::Timeout));
}

#[test]
fn test_sandboxes_share_cached_environment() {
    let config = SandboxConfig::builder()
        .allowed_modules(["json", "math", "string"])
        .build();
    let a = PythonSandbox::new(config.clone()).unwrap();
    let b = PythonSandbox::new(config).unwrap();
    assert!(Arc::ptr_eq(a.capabilities(), b.capabilities()));
    assert!(global_cache().contains(["math", "string", "json"]));
}

#[test]
fn test_config_from_toml() {
    let config = SandboxConfig::from_toml_str(
        r#"
timeout_ms = 250
allowed_modules = ["math"]
"#,
    )
    .unwrap();
    let sandbox = PythonSandbox::new(config).unwrap();

    let result = sandbox.execute_blocking("import math\nprint(math.factorial(5))");
    assert_eq!(result.output, "120\n");

    let result = sandbox.execute_blocking("import random");
    assert_eq!(result.fault(), Some(FaultKind::Violation));

    let result = sandbox.execute_blocking("while True: pass");
    assert!(result.error.contains("0.25 seconds"));
}
