//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions never block the runtime on I/O.
//! **Required**: `tokio::fs`, `tokio::io::stdin()` / `stdout()`, async `reqwest`.
//! **Acceptable**: blocking calls in plain `fn`s that run before the runtime
//! serves requests (configuration loading), and test code.

use architectural_enforcement::{production_sources, report};

const BLOCKING: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
];

#[test]
fn test_no_blocking_io_in_async_functions() {
    let mut violations = Vec::new();

    for file in production_sources(None) {
        for (idx, line) in file.lines.iter().enumerate() {
            if line.code.contains("reqwest::blocking") {
                violations.push(file.violation(line, "Blocking HTTP client"));
                continue;
            }
            for (pattern, what) in BLOCKING {
                if line.code.contains(pattern) && file.in_async_fn(idx) {
                    violations.push(file.violation(line, what));
                }
            }
        }
    }

    report(
        "Blocking I/O found in async code",
        &[
            "tokio::fs::read_to_string().await",
            "tokio::io::stdin() / tokio::io::stdout()",
            "reqwest::Client (async)",
        ],
        &violations,
    );
}
