//! Architectural Enforcement
//!
//! Source scanning helpers shared by the enforcement tests in `tests/`:
//! - no sleep calls in production code
//! - no `std::sync` locks in the routing module
//! - no blocking I/O inside async functions
//!
//! Production code means everything under a crate's `src/` up to the first
//! `#[cfg(test)]` line, with comments removed. Files that are test-only in
//! their entirety (such as `test_utils.rs`) are skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Crates whose production code is checked, relative to the workspace root
pub const PRODUCTION_CRATES: &[&str] = &["dispatch/core", "dispatch/daemon"];

/// File names that only compile under `cfg(test)`
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// One production line of a source file
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// 1-based line number
    pub number: usize,
    /// Line text with any trailing `//` comment removed
    pub code: String,
}

/// Production portion of a Rust source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<SourceLine>,
}

impl SourceFile {
    /// Parse file content, keeping only production lines
    #[must_use]
    pub fn parse(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
            .map(|(idx, line)| SourceLine {
                number: idx + 1,
                code: strip_comment(line).to_string(),
            })
            .collect();

        Self { path, lines }
    }

    /// Format a violation at `line`
    #[must_use]
    pub fn violation(&self, line: &SourceLine, what: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            line.number,
            what,
            line.code.trim()
        )
    }

    /// Whether the line at `idx` sits inside an `async fn` body
    ///
    /// Scans backwards to the nearest function signature.
    #[must_use]
    pub fn in_async_fn(&self, idx: usize) -> bool {
        for line in self.lines[..=idx].iter().rev() {
            let code = line.code.trim();
            if code.contains("async fn ") {
                return true;
            }
            if code.starts_with("fn ") || code.contains(" fn ") {
                return false;
            }
        }
        false
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) if !line[..pos].contains('"') => &line[..pos],
        _ => line,
    }
}

/// Production sources of every checked crate, optionally limited to a
/// sub-directory of `src/` (e.g. `"routing"`)
#[must_use]
pub fn production_sources(subdir: Option<&str>) -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for krate in PRODUCTION_CRATES {
        let mut dir = root.join(krate).join("src");
        if let Some(sub) = subdir {
            dir = dir.join(sub);
        }
        if !dir.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
            if TEST_ONLY_FILES.contains(&name) {
                continue;
            }
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let relative = path.strip_prefix(&root).unwrap_or(path).to_path_buf();
            files.push(SourceFile::parse(relative, &content));
        }
    }

    files
}

/// Panic with a readable report if any violations were found
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn report(rule: &str, guidance: &[&str], violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in guidance {
        eprintln!("  ✅ {line}");
    }

    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stops_at_test_module() {
        let file = SourceFile::parse(
            PathBuf::from("x.rs"),
            "fn a() {}\n// note\nfn b() {} // trailing\n#[cfg(test)]\nmod tests {}\n",
        );

        assert_eq!(file.lines.len(), 3);
        assert_eq!(file.lines[1].code, "");
        assert_eq!(file.lines[2].code.trim(), "fn b() {}");
    }

    #[test]
    fn test_comment_inside_string_is_kept() {
        assert_eq!(
            strip_comment(r#"let url = "http://localhost";"#),
            r#"let url = "http://localhost";"#
        );
    }

    #[test]
    fn test_async_fn_detection() {
        let file = SourceFile::parse(
            PathBuf::from("x.rs"),
            "async fn serve() {\n    read();\n}\nfn load() {\n    read();\n}\n",
        );

        assert!(file.in_async_fn(1));
        assert!(!file.in_async_fn(4));
    }

    #[test]
    fn test_workspace_root_contains_checked_crates() {
        let root = workspace_root();
        for krate in PRODUCTION_CRATES {
            assert!(root.join(krate).join("Cargo.toml").exists(), "{krate} missing");
        }
    }
}
