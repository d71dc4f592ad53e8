//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code never sleeps. Waiting happens on I/O, on
//! channels, or on a `tokio::time::interval` tick; deadlines use
//! `tokio::time::timeout`.
//! **Exceptions**: test code

use architectural_enforcement::{production_sources, report};

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources(None) {
        for line in &file.lines {
            if line.code.contains("::sleep(") || line.code.contains(".sleep(") {
                violations.push(file.violation(line, "Sleep call"));
            }
        }
    }

    report(
        "Sleep calls found in production code",
        &[
            "Periodic work: tokio::time::interval()",
            "Deadlines: tokio::time::timeout()",
            "Test code may advance a paused clock instead of sleeping",
        ],
        &violations,
    );
}
