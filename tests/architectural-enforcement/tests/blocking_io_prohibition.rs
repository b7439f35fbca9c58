//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code in the relay crates MUST NOT use blocking I/O
//! from async code. A blocked runtime thread stalls every stream relay and
//! ack timer scheduled on it.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::io`, not `std::fs`, `std::net`, `std::io::stdin`

use std::fs;
use std::path::Path;

use architectural_enforcement::{production_dirs, rust_files};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command::output()");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::io::stdin(), tokio::io::stdout()");
        eprintln!("  - reqwest::Client::post().send().await");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Private non-async functions (config loading before the runtime)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls in production code
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for dir in production_dirs() {
        for file in rust_files(&dir) {
            check_file(&file, &mut violations);
        }
    }
    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    let lines: Vec<&str> = content.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        if is_in_test_function(&lines, idx) {
            continue;
        }

        // Blocking before the runtime starts is fine
        if is_in_non_async_function(&lines, idx) {
            continue;
        }

        let mut flag = |kind: &str| {
            violations.push(format!(
                "{}:{} - {kind}: {}",
                path.display(),
                line_number,
                line.trim()
            ));
        };

        if code_part.contains("std::fs::") || code_part.contains("use std::fs") {
            flag("Blocking file I/O");
        }

        if code_part.contains("std::net::") || code_part.contains("use std::net") {
            flag("Blocking network I/O");
        }

        if code_part.contains("std::process::Command") {
            flag("Blocking process I/O");
        }

        if code_part.contains("reqwest::blocking") {
            flag("Blocking HTTP client");
        }

        if (code_part.contains("std::io::stdin()") || code_part.contains("std::io::stdout()"))
            && is_in_async_function(&lines, idx)
        {
            flag("Blocking stdin/stdout in async");
        }
    }
}

/// Whether a trimmed line opens a function, with or without visibility
fn fn_signature(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("pub(crate) ")
        .or_else(|| line.strip_prefix("pub "))
        .unwrap_or(line);
    (rest.starts_with("fn ") || rest.starts_with("async fn ")).then_some(rest)
}

/// Check if line is inside a test function
fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    let mut found_fn_idx = None;
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if fn_signature(line).is_some() {
            found_fn_idx = Some(i);
            break;
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }

    let Some(fn_idx) = found_fn_idx else {
        return false;
    };

    for i in (0..fn_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("#[test]")
            || line.starts_with("#[tokio::test")
            || line.starts_with("#[cfg(test)]")
        {
            return true;
        }

        // Stop if we hit another function or boundary
        if fn_signature(line).is_some() || line.starts_with("mod ") || line.starts_with("impl ") {
            break;
        }
    }

    false
}

/// Check if line is inside an async function
fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if let Some(signature) = fn_signature(line) {
            return signature.starts_with("async fn ");
        }

        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Check if line is inside a private non-async function
///
/// Public functions are excluded: callers may reach them from async code.
fn is_in_non_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("fn ") {
            return true;
        }

        if fn_signature(line).is_some() {
            return false;
        }

        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_io_detection() {
        let test_code = vec![
            "pub async fn load() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];

        assert!(is_in_async_function(&test_code, 1));
        assert!(!is_in_non_async_function(&test_code, 1));
        assert!(!is_in_test_function(&test_code, 1));
    }

    #[test]
    fn test_private_non_async_function_detection() {
        let test_code = vec![
            "fn read_config_file(path: &Path) -> Result<String, ConfigError> {",
            "    std::fs::read_to_string(path)",
            "}",
        ];

        assert!(is_in_non_async_function(&test_code, 1));
    }

    #[test]
    fn test_public_non_async_function_is_not_exempt() {
        let test_code = vec![
            "pub fn load_everything() -> String {",
            "    std::fs::read_to_string(\"x\").unwrap_or_default()",
            "}",
        ];

        assert!(!is_in_non_async_function(&test_code, 1));
        assert!(!is_in_async_function(&test_code, 1));
    }

    #[test]
    fn test_test_function_detection() {
        let test_code = vec![
            "#[tokio::test]",
            "async fn test_something() {",
            "    let contents = std::fs::read_to_string(\"test.txt\")?;",
            "}",
        ];

        assert!(is_in_test_function(&test_code, 2));
    }
}
