//! Integration Test: Lock Discipline in Routing
//!
//! **Policy**: shared routing state (budget, cache, metrics, registry) uses
//! `parking_lot` locks or `dashmap`, never `std::sync::Mutex` / `RwLock`.
//! Atomics, `Arc` and `Weak` from `std::sync` are fine.

use architectural_enforcement::{production_sources, report};

const FORBIDDEN: &[&str] = &[
    "std::sync::Mutex",
    "std::sync::RwLock",
    "sync::{Mutex",
    "sync::{RwLock",
    "Mutex, RwLock}",
];

#[test]
fn test_routing_uses_parking_lot_locks() {
    let mut violations = Vec::new();

    for file in production_sources(Some("routing")) {
        for line in &file.lines {
            let uses_std_lock = FORBIDDEN.iter().any(|p| line.code.contains(p))
                || (line.code.contains("use std::sync::")
                    && (line.code.contains("Mutex") || line.code.contains("RwLock")));
            if uses_std_lock {
                violations.push(file.violation(line, "std::sync lock"));
            }
        }
    }

    report(
        "std::sync locks found in the routing module",
        &[
            "parking_lot::Mutex / parking_lot::RwLock",
            "dashmap::DashMap for keyed state",
            "std::sync::atomic for counters",
        ],
        &violations,
    );
}

#[test]
fn test_routing_module_is_scanned() {
    assert!(
        !production_sources(Some("routing")).is_empty(),
        "routing sources not found; the scan would pass vacuously"
    );
}
