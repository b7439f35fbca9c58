//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the relay crates:
//! - No sleep() calls in production code
//! - No blocking I/O inside async code
//!
//! These tests are designed to catch violations early in the development cycle.
//! The library half only knows where production code lives.

use std::path::{Path, PathBuf};

/// Workspace root, resolved from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Production source directories subject to enforcement
#[must_use]
pub fn production_dirs() -> Vec<PathBuf> {
    let root = workspace_root();
    vec![
        root.join("relay").join("core").join("src"),
        root.join("relay").join("cli").join("src"),
    ]
}

/// Every `.rs` file under `dir`, sorted for stable reports
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_dirs_exist() {
        for dir in production_dirs() {
            assert!(dir.is_dir(), "missing production directory: {}", dir.display());
        }
    }

    #[test]
    fn test_rust_files_finds_crate_roots() {
        let core = &production_dirs()[0];
        let files = rust_files(core);
        assert!(files.iter().any(|f| f.ends_with("lib.rs")));
        assert!(files.iter().all(|f| f.extension().is_some_and(|e| e == "rs")));
    }
}
