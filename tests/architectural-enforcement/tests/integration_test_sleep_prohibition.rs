//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the relay crates MUST NOT call sleep methods.
//! Everything waits on I/O, a channel, a deadline or a cancellation token.
//! **Exceptions**: exponential backoff (retry logic only), periodic tasks
//! driven by `tokio::time::interval`, test code.

use std::fs;
use std::path::Path;

use architectural_enforcement::{production_dirs, rust_files};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff in retry logic");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops (wait on the channel instead)");
        eprintln!("  - Sleep to enforce a timeout (use tokio::time::timeout)");
        eprintln!("  - Sleep to 'wait' for an ack or a stream (select on it!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let policy = SleepPolicy {
        allow_backoff: true,
        allow_tests: true,
    };

    let mut violations = Vec::new();
    for dir in production_dirs() {
        for file in rust_files(&dir) {
            check_file(&file, &mut violations, &policy);
        }
    }
    violations
}

struct SleepPolicy {
    allow_backoff: bool,
    allow_tests: bool,
}

fn check_file(path: &Path, violations: &mut Vec<String>, policy: &SleepPolicy) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    let lines: Vec<&str> = content.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        if code_part.contains("::sleep(") || code_part.contains(".sleep(") {
            if policy.allow_tests && is_in_test_function(&lines, idx) {
                continue;
            }

            if policy.allow_backoff && is_backoff_context(&lines, idx) {
                continue;
            }

            if is_interval_pattern(&lines, idx) {
                continue;
            }

            violations.push(format!(
                "{}:{} - {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }
    }
}

/// Check if line is inside a test function
fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    // Scan backwards for #[test] or #[tokio::test]
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("fn ") && !line.contains("test") {
            return false; // Found a non-test function first
        }

        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || line.starts_with("impl ") {
            return false;
        }
    }
    false
}

/// Check if sleep is used for exponential backoff (acceptable for retry logic)
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for line in &lines[context_range] {
        let line = line.to_lowercase();

        // 2^n pattern, bit shift or multiplier
        if line.contains("<<")
            || line.contains("pow")
            || line.contains("* 2")
            || line.contains("multiplier")
        {
            has_backoff_calc = true;
        }

        if line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Check if this is a `tokio::time::interval` pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let before = current_idx.saturating_sub(20)..current_idx;
    if lines[before]
        .iter()
        .any(|l| l.contains("interval.tick()") || l.contains("tokio::time::interval"))
    {
        return true;
    }

    let after = current_idx..std::cmp::min(current_idx + 5, lines.len());
    lines[after].iter().any(|l| l.contains("interval.tick()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_outside_test_is_flagged() {
        let test_code = vec![
            "fn wait_for_ack() {",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ];

        assert!(!is_in_test_function(&test_code, 1));
        assert!(!is_backoff_context(&test_code, 1));
        assert!(!is_interval_pattern(&test_code, 1));
    }

    #[test]
    fn test_async_test_function_detection() {
        let test_code = vec![
            "#[tokio::test(start_paused = true)]",
            "async fn test_slow_stream() {",
            "    let producer = tokio::spawn(async move {",
            "        tokio::time::sleep(Duration::from_secs(10)).await;",
            "    });",
            "}",
        ];

        assert!(is_in_test_function(&test_code, 3));
    }

    #[test]
    fn test_backoff_detection() {
        let test_code = vec![
            "fn reconnect() {",
            "    let delay = base_delay * (1 << attempt);",
            "    tracing::debug!(attempt, \"Retrying\");",
            "    tokio::time::sleep(Duration::from_millis(delay)).await;",
            "}",
        ];

        assert!(is_backoff_context(&test_code, 3));
    }
}
