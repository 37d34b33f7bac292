//! Security tests to verify sandbox isolation.
//!
//! These tests attempt various escape techniques to verify the sandbox
//! properly restricts access to the host system.

use std::time::Duration;
use restricted_python_sandbox::prelude::*;

/// Helper to create a test sandbox config.
fn test_config() -> SandboxConfig {
    SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .build()
}

fn assert_rejected(result: &ExecutionResult, needle: &str) {
    assert!(!result.success, "should be rejected: {:?}", result);
    assert_eq!(result.fault(), Some(FaultKind::Violation));
    assert!(
        result.error.contains(needle),
        "error {:?} should mention {:?}",
        result.error,
        needle
    );
    assert!(result.output.is_empty());
}

/// Test that infinite loops are properly terminated.
#[tokio::test]
async fn test_infinite_loop_timeout() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(500))
        .build();

    let sandbox = PythonSandbox::new(config).unwrap();

    let result = sandbox.execute("while True: pass").await;
    assert!(!result.success, "infinite loop should timeout");
    assert_eq!(result.fault(), Some(FaultKind::Timeout));
    assert!(result.error.contains("timed out"));
}

/// A bare `except` cannot swallow the deadline.
#[tokio::test]
async fn test_timeout_cannot_be_caught() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(300))
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let result = sandbox
        .execute(
            r#"
while True:
    try:
        while True:
            pass
    except:
        print('SECURITY_BREACH: caught the deadline')
    finally:
        print('SECURITY_BREACH: finally ran')
"#,
        )
        .await;

    assert_eq!(result.fault(), Some(FaultKind::Timeout));
    assert!(!result.output.contains("SECURITY_BREACH"));
}

/// Test that filesystem access is blocked.
#[tokio::test]
async fn test_filesystem_access_blocked() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let result = sandbox
        .execute("data = open('/etc/passwd', 'r').read()\nprint(data)")
        .await;
    assert_rejected(&result, "\"open\" is a forbidden name");

    let result = sandbox
        .execute("with open('/etc/passwd') as f:\n    print(f.read())")
        .await;
    assert_rejected(&result, "with statements are not allowed");
}

/// Test that os module dangerous operations are restricted.
#[tokio::test]
async fn test_os_operations_blocked() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let result = sandbox.execute("import os\nos.system('ls')").await;
    assert_rejected(&result, "import of module \"os\" is not allowed");
    assert!(result.error.starts_with("Line 1: "));
}

/// Test that subprocess, socket and friends cannot be imported in any form.
#[tokio::test]
async fn test_dangerous_imports_blocked() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    for source in [
        "import subprocess",
        "from socket import socket",
        "import ctypes",
        "import pickle",
        "import os.path",
        "from math import floor\nimport sys, shutil",
    ] {
        let result = sandbox.execute(source).await;
        assert_eq!(result.fault(), Some(FaultKind::Violation), "{}", source);
        assert!(result.error.contains("is not allowed"), "{}", source);
    }
}

/// Referencing a module by name without importing it is just as closed.
#[tokio::test]
async fn test_unlisted_module_name_is_undefined() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let result = sandbox.execute("os.system('ls')").await;
    assert_eq!(result.fault(), Some(FaultKind::UndefinedName));
    assert_eq!(result.error, "NameError: name 'os' is not defined");
}

/// Test eval/exec and other dynamic-code primitives.
#[tokio::test]
async fn test_eval_exec_rejected() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    for name in ["eval", "exec", "compile", "globals", "getattr", "vars", "input"] {
        let result = sandbox.execute(&format!("f = {}", name)).await;
        assert_rejected(&result, &format!("\"{}\" is a forbidden name", name));
    }
}

/// Test that dunder attribute walks are rejected before anything runs.
#[tokio::test]
async fn test_dunder_access_rejected() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let result = sandbox
        .execute("print('before')\n().__class__.__bases__[0].__subclasses__()")
        .await;
    assert_rejected(&result, "\"__class__\" is an invalid attribute name");
    assert!(result.error.contains("\"__subclasses__\""));

    let result = sandbox.execute("__builtins__['open']").await;
    assert_rejected(&result, "\"__builtins__\" is an invalid variable name");

    let result = sandbox.execute("__import__('os')").await;
    assert_rejected(&result, "\"__import__\"");
}

/// Every violation is reported, not just the first.
#[tokio::test]
async fn test_all_violations_reported() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let result = sandbox
        .execute("import os\nx = eval('1')\ny = x._secret")
        .await;
    assert_eq!(result.fault(), Some(FaultKind::Violation));
    let lines: Vec<&str> = result.error.lines().collect();
    assert_eq!(lines.len(), 3, "{}", result.error);
    assert!(lines[0].starts_with("Line 1: "));
    assert!(lines[1].starts_with("Line 2: "));
    assert!(lines[2].starts_with("Line 3: "));
}

/// Test memory exhaustion protection.
#[tokio::test]
async fn test_memory_exhaustion_protection() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .max_sequence_len(100_000)
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let result = sandbox.execute("x = 'a' * 10 ** 9").await;
    assert_eq!(result.fault(), Some(FaultKind::Runtime));
    assert!(result.error.starts_with("MemoryError"), "{}", result.error);

    let result = sandbox
        .execute("data = []\nwhile True:\n    data.append([0] * 1000)\n    data = data * 2")
        .await;
    assert!(!result.success);
    assert!(result.error.starts_with("MemoryError"), "{}", result.error);
}

/// Deep recursion is a Python error, not a crashed host.
#[tokio::test]
async fn test_recursion_bomb() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let result = sandbox.execute("def f():\n    return f()\nf()").await;
    assert_eq!(result.fault(), Some(FaultKind::Runtime));
    assert_eq!(result.error, "RecursionError: maximum recursion depth exceeded");

    // Deeply nested literals are refused by the compiler instead.
    let source = format!("x = {}1{}", "[".repeat(500), "]".repeat(500));
    let result = sandbox.execute(&source).await;
    assert_eq!(result.fault(), Some(FaultKind::Violation));
}

/// On the smallest accepted worker stack, deep recursion still ends in a
/// Python error instead of overflowing the thread.
#[tokio::test]
async fn test_recursion_on_smallest_stack() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .worker_stack_size(restricted_python_sandbox::sandbox::limits::MIN_WORKER_STACK_SIZE)
        .max_recursion_depth(10_000)
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let result = sandbox
        .execute("def f(n):\n    return 0 if n == 0 else 1 + f(n - 1)\nprint(f(5000))")
        .await;
    assert_eq!(result.fault(), Some(FaultKind::Runtime));
    assert_eq!(result.error, "RecursionError: maximum recursion depth exceeded");

    let result = sandbox.execute("print('alive')").await;
    assert_eq!(result.output, "alive\n");
}

/// Output flooding is capped, and the run still succeeds.
#[tokio::test]
async fn test_output_flood_truncated() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .max_output_bytes(1024)
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let result = sandbox.execute("for i in range(10000):\n    print('x' * 50)").await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.output.len() <= 1024);
    assert!(result.metadata.output_truncated);
}

/// Test that globals do not leak between executions.
#[tokio::test]
async fn test_no_state_leakage() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let rejected = sandbox.execute("import math\nmath.tau = 0").await;
    assert_rejected(&rejected, "assignment to attributes is not allowed");

    let first = sandbox.execute("secret = 42").await;
    assert!(first.success);

    let second = sandbox.execute("print(secret)").await;
    assert_eq!(second.fault(), Some(FaultKind::UndefinedName));
    assert_eq!(second.error, "NameError: name 'secret' is not defined");
}

/// Rebinding a builtin only affects the current run.
#[tokio::test]
async fn test_builtins_manipulation() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();

    let first = sandbox.execute("len = lambda x: 0\nprint(len([1, 2]))").await;
    assert_eq!(first.output, "0\n");

    let second = sandbox.execute("print(len([1, 2]))").await;
    assert_eq!(second.output, "2\n");
}
