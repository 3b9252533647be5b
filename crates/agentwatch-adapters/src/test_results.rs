//! Recognises test-runner summaries in captured command output.
//!
//! Patterns are tried in a fixed order, one per runner family and then a
//! generic `N passed / N failed / N skipped` grammar. The first family that
//! matches decides the counts.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Runner summaries
// ═══════════════════════════════════════════════════════════════════════════════

static RE_CARGO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored").unwrap()
});
static RE_PYTEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^=+ (.*\b(?:passed|failed|error|errors|skipped)\b.*) in [\d.]+s.*=+\s*$").unwrap());
static RE_JEST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Tests:\s+(.*\d+ total)").unwrap());
static RE_VITEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Tests\s+(.*(?:passed|failed|skipped).*)\(\d+\)").unwrap());
static RE_GO_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*--- (PASS|FAIL|SKIP): ").unwrap());
static RE_GO_PKG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(ok|FAIL)\s+\S+\s+(?:[\d.]+s|\(cached\))").unwrap());
static RE_MOCHA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(\d+) passing\b").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Count extraction
// ═══════════════════════════════════════════════════════════════════════════════

static RE_PASSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) passed").unwrap());
static RE_FAILED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) (?:failed|errors?)\b").unwrap());
static RE_SKIPPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) (?:skipped|pending|todo)\b").unwrap());
// The generic grammar is strictly `N passed / N failed / N skipped`, so
// linter and compiler tallies like `3 errors` never read as test runs.
static RE_GENERIC_FAILED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) failed\b").unwrap());
static RE_GENERIC_SKIPPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) skipped\b").unwrap());
static RE_MOCHA_FAILING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(\d+) failing\b").unwrap());
static RE_MOCHA_PENDING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(\d+) pending\b").unwrap());

/// Counts recovered from one runner summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSummary {
    pub framework: &'static str,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

type Detector = fn(&str) -> Option<TestSummary>;

const DETECTORS: [Detector; 7] = [cargo, pytest, jest, vitest, go, mocha, generic];

/// Classify command output. `None` when nothing looks like a test summary.
pub fn classify(output: &str) -> Option<TestSummary> {
    DETECTORS.iter().find_map(|detect| detect(output))
}

fn cargo(output: &str) -> Option<TestSummary> {
    let mut summary: Option<TestSummary> = None;
    // One `test result:` line per test binary; add them up.
    for caps in RE_CARGO.captures_iter(output) {
        let s = summary.get_or_insert(TestSummary {
            framework: "cargo",
            passed: 0,
            failed: 0,
            skipped: 0,
        });
        s.passed += number(caps.get(1));
        s.failed += number(caps.get(2));
        s.skipped += number(caps.get(3));
    }
    summary
}

fn pytest(output: &str) -> Option<TestSummary> {
    let caps = RE_PYTEST.captures_iter(output).last()?;
    Some(counts("pytest", caps.get(1)?.as_str()))
}

fn jest(output: &str) -> Option<TestSummary> {
    let caps = RE_JEST.captures_iter(output).last()?;
    Some(counts("jest", caps.get(1)?.as_str()))
}

fn vitest(output: &str) -> Option<TestSummary> {
    let caps = RE_VITEST.captures_iter(output).last()?;
    Some(counts("vitest", caps.get(1)?.as_str()))
}

fn go(output: &str) -> Option<TestSummary> {
    let mut summary = TestSummary {
        framework: "go",
        passed: 0,
        failed: 0,
        skipped: 0,
    };

    for caps in RE_GO_CASE.captures_iter(output) {
        match caps.get(1).map(|m| m.as_str()) {
            Some("PASS") => summary.passed += 1,
            Some("FAIL") => summary.failed += 1,
            _ => summary.skipped += 1,
        }
    }
    if summary.passed + summary.failed + summary.skipped > 0 {
        return Some(summary);
    }

    // Non-verbose runs only report per package.
    for caps in RE_GO_PKG.captures_iter(output) {
        match caps.get(1).map(|m| m.as_str()) {
            Some("ok") => summary.passed += 1,
            _ => summary.failed += 1,
        }
    }
    (summary.passed + summary.failed > 0).then_some(summary)
}

fn mocha(output: &str) -> Option<TestSummary> {
    let passed = RE_MOCHA.captures(output)?;
    Some(TestSummary {
        framework: "mocha",
        passed: number(passed.get(1)),
        failed: first_count(&RE_MOCHA_FAILING, output),
        skipped: first_count(&RE_MOCHA_PENDING, output),
    })
}

fn generic(output: &str) -> Option<TestSummary> {
    if !RE_PASSED.is_match(output) && !RE_GENERIC_FAILED.is_match(output) {
        return None;
    }
    Some(TestSummary {
        framework: "generic",
        passed: first_count(&RE_PASSED, output),
        failed: first_count(&RE_GENERIC_FAILED, output),
        skipped: first_count(&RE_GENERIC_SKIPPED, output),
    })
}

fn counts(framework: &'static str, text: &str) -> TestSummary {
    TestSummary {
        framework,
        passed: first_count(&RE_PASSED, text),
        failed: first_count(&RE_FAILED, text),
        skipped: first_count(&RE_SKIPPED, text),
    }
}

fn first_count(re: &Regex, text: &str) -> u32 {
    re.captures(text).map(|c| number(c.get(1))).unwrap_or(0)
}

fn number(m: Option<regex::Match<'_>>) -> u32 {
    m.and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cargo_sums_binaries() {
        let out = "running 3 tests\n\
                   test result: ok. 3 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out\n\
                   running 2 tests\n\
                   test result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out\n";
        let s = classify(out).unwrap();
        assert_eq!(s.framework, "cargo");
        assert_eq!((s.passed, s.failed, s.skipped), (4, 1, 1));
    }

    #[test]
    fn test_pytest_summary_line() {
        let out = "tests/test_api.py ..F.s\n\
                   ========== 1 failed, 3 passed, 1 skipped in 0.42s ==========\n";
        let s = classify(out).unwrap();
        assert_eq!(s.framework, "pytest");
        assert_eq!((s.passed, s.failed, s.skipped), (3, 1, 1));
    }

    #[test]
    fn test_jest_summary() {
        let out = "Test Suites: 1 failed, 2 passed, 3 total\n\
                   Tests:       2 failed, 1 skipped, 10 passed, 13 total\n";
        let s = classify(out).unwrap();
        assert_eq!(s.framework, "jest");
        assert_eq!((s.passed, s.failed, s.skipped), (10, 2, 1));
    }

    #[test]
    fn test_vitest_summary() {
        let out = " Test Files  1 passed (1)\n      Tests  4 passed | 1 skipped (5)\n";
        let s = classify(out).unwrap();
        assert_eq!(s.framework, "vitest");
        assert_eq!((s.passed, s.failed, s.skipped), (4, 0, 1));
    }

    #[test]
    fn test_go_verbose_and_package() {
        let verbose = "=== RUN   TestA\n--- PASS: TestA (0.00s)\n=== RUN   TestB\n--- FAIL: TestB (0.01s)\nFAIL\n";
        let s = classify(verbose).unwrap();
        assert_eq!(s.framework, "go");
        assert_eq!((s.passed, s.failed), (1, 1));

        let quiet = "ok  \tgithub.com/dev/app/pkg\t0.012s\nFAIL\tgithub.com/dev/app/cmd\t0.200s\n";
        let s = classify(quiet).unwrap();
        assert_eq!((s.passed, s.failed), (1, 1));
    }

    #[test]
    fn test_mocha_summary() {
        let out = "  12 passing (40ms)\n  2 pending\n  1 failing\n";
        let s = classify(out).unwrap();
        assert_eq!(s.framework, "mocha");
        assert_eq!((s.passed, s.failed, s.skipped), (12, 1, 2));
    }

    #[test]
    fn test_generic_fallback() {
        let s = classify("Ran suite: 7 passed, 0 failed").unwrap();
        assert_eq!(s.framework, "generic");
        assert_eq!((s.passed, s.failed), (7, 0));
    }

    #[test]
    fn test_not_a_test_run() {
        assert!(classify("Compiling app v0.1.0\nFinished dev profile").is_none());
    }

    #[test]
    fn test_lint_error_tally_is_not_a_test_run() {
        assert!(classify("✖ 5 problems (3 errors, 2 warnings)").is_none());
        assert!(classify("error: could not compile `app` due to 2 previous errors").is_none());
        assert!(classify("Found 4 errors in 2 files.").is_none());
    }

    #[test]
    fn test_pytest_still_counts_errors() {
        let out = "==== 2 failed, 5 passed, 1 error in 0.42s ====\n";
        let s = classify(out).unwrap();
        assert_eq!(s.framework, "pytest");
        assert_eq!((s.passed, s.failed), (5, 2));
    }
}
