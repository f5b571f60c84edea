//! Text heuristics behind the quality policy.
//!
//! Every check returns a score in `[0, 1]`. They look for structure and
//! keywords only; none of them executes or parses the artifact.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::language::Language;
use crate::policy::Scorecard;
use crate::workflow::stage::Stage;
use crate::workflow::state::DesignDocument;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w{4,}\b").expect("valid regex"));

static HARDCODED_SECRET: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)password\s*=\s*["'][^"']*["']"#,
        r#"(?i)secret\s*=\s*["'][^"']*["']"#,
        r#"(?i)api_?key\s*=\s*["'][^"']*["']"#,
        r#"(?i)token\s*=\s*["'][^"']*["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static SQL_CONCAT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)(SELECT|INSERT|UPDATE|DELETE).*\+.*["']"#,
        r#"(?i)query.*%.*["']"#,
        r#"(?i)execute.*%.*["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static FUNCTION_DEF: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"def\s+\w+",
        r"function\s+\w+",
        r"public\s+\w+",
        r"func\s+\w+",
        r"fn\s+\w+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

const STOP_WORDS: &[&str] = &["that", "with", "have", "will", "this", "from", "they", "want"];

fn keywords(text: &str) -> HashSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn count_matches(text: &str, patterns: &[Regex]) -> usize {
    patterns.iter().filter(|re| re.is_match(text)).count()
}

fn keyword_hits(text: &str, words: &[&str]) -> usize {
    words.iter().filter(|w| text.contains(*w)).count()
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

// --- User stories ---

pub fn score_user_stories(stories: &[String], requirements: &str) -> Scorecard {
    Scorecard {
        completeness: Some(story_format(stories)),
        consistency: Some(requirements_alignment(stories, requirements)),
        security: None,
        best_practices: Some(story_practices(stories)),
    }
}

/// Share of stories written as "As a ... I want ... so that ...".
fn story_format(stories: &[String]) -> f64 {
    if stories.is_empty() {
        return 0.0;
    }
    let total: f64 = stories
        .iter()
        .map(|story| {
            let s = story.to_lowercase();
            let (as_a, want, so_that) =
                (s.contains("as a"), s.contains("i want"), s.contains("so that"));
            match (as_a, want, so_that) {
                (true, true, true) => 1.0,
                (true, true, false) => 0.7,
                _ if as_a || want || so_that => 0.3,
                _ => 0.0,
            }
        })
        .sum();
    total / stories.len() as f64
}

fn requirements_alignment(stories: &[String], requirements: &str) -> f64 {
    if stories.is_empty() || requirements.trim().is_empty() {
        return 0.0;
    }
    let wanted = keywords(requirements);
    if wanted.is_empty() {
        return 0.5;
    }
    let covered = keywords(&stories.join(" "));
    clamp(wanted.intersection(&covered).count() as f64 / wanted.len() as f64)
}

fn story_practices(stories: &[String]) -> f64 {
    if stories.is_empty() {
        return 0.0;
    }
    let mut score: f64 = 1.0;
    for story in stories {
        let words = story.split_whitespace().count();
        if !(8..=60).contains(&words) {
            score -= 0.1;
        }
    }
    let unique: HashSet<&String> = stories.iter().collect();
    if unique.len() < stories.len() {
        score -= 0.2;
    }
    let testable = stories
        .iter()
        .filter(|s| {
            let s = s.to_lowercase();
            ["validate", "verify", "ensure", "check", "confirm"]
                .iter()
                .any(|w| s.contains(w))
        })
        .count();
    if (testable as f64) < stories.len() as f64 * 0.3 {
        score -= 0.15;
    }
    clamp(score)
}

// --- Design document ---

pub fn score_design(doc: &DesignDocument, stories: &[String]) -> Scorecard {
    let technical = doc.technical.join(" ").to_lowercase();
    Scorecard {
        completeness: Some(design_completeness(doc)),
        consistency: Some(design_story_coverage(doc, stories)),
        security: Some(design_security(&technical, doc.technical.is_empty())),
        best_practices: Some(design_practices(&technical, doc.technical.is_empty())),
    }
}

fn section_weight(len: usize) -> f64 {
    match len {
        n if n >= 5 => 0.5,
        n if n >= 3 => 0.35,
        n => n as f64 * 0.1,
    }
}

fn design_completeness(doc: &DesignDocument) -> f64 {
    clamp(section_weight(doc.functional.len()) + section_weight(doc.technical.len()))
}

fn design_story_coverage(doc: &DesignDocument, stories: &[String]) -> f64 {
    if stories.is_empty() {
        return 1.0;
    }
    let design_text = doc
        .functional
        .iter()
        .chain(&doc.technical)
        .chain(&doc.assumptions)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let covered = stories
        .iter()
        .filter(|story| {
            let parts = keywords(story);
            let hits = parts.iter().filter(|p| design_text.contains(p.as_str())).count();
            hits >= 2 || (parts.len() <= 2 && hits >= 1)
        })
        .count();
    covered as f64 / stories.len() as f64
}

fn design_practices(technical: &str, empty: bool) -> f64 {
    if empty {
        return 0.3;
    }
    const ASPECTS: &[&[&str]] = &[
        &["api", "endpoint", "rest", "graphql"],
        &["database", "data model", "schema", "storage"],
        &["security", "authentication", "authorization", "encryption"],
        &["scalability", "performance", "load", "cache"],
        &["error handling", "exception", "validation", "logging"],
        &["test", "quality"],
        &["deployment", "docker", "cloud", "infrastructure"],
    ];
    let covered = ASPECTS
        .iter()
        .filter(|words| words.iter().any(|w| technical.contains(w)))
        .count();
    clamp(covered as f64 / ASPECTS.len() as f64)
}

fn design_security(technical: &str, empty: bool) -> f64 {
    if empty {
        return 0.4;
    }
    let hits = keyword_hits(
        technical,
        &[
            "authentication",
            "authorization",
            "encryption",
            "validation",
            "sanitization",
            "ssl",
            "https",
            "token",
            "security",
            "access control",
        ],
    );
    clamp(0.4 + hits as f64 * 0.06)
}

// --- Code ---

pub fn score_code(code: &str, language: Language) -> Scorecard {
    if code.trim().is_empty() {
        return Scorecard {
            completeness: Some(0.0),
            consistency: Some(0.0),
            security: Some(0.0),
            best_practices: Some(0.0),
        };
    }
    match language {
        Language::Python => score_python(code),
        Language::Javascript | Language::Typescript => score_javascript(code),
        Language::Java => score_java(code),
        _ => score_generic(code),
    }
}

fn ratio(flags: &[bool]) -> f64 {
    flags.iter().filter(|f| **f).count() as f64 / flags.len() as f64
}

fn score_python(code: &str) -> Scorecard {
    let has_imports = code
        .lines()
        .any(|l| l.trim_start().starts_with("import ") || l.trim_start().starts_with("from "));
    let structure = ratio(&[
        has_imports,
        code.contains("def ") || code.contains("class "),
        code.contains("__main__"),
    ]);
    let errors = ratio(&[
        code.contains("try:") && code.contains("except"),
        code.contains("logging") || code.contains("logger"),
    ]);
    let docs = ratio(&[
        code.contains("\"\"\"") || code.contains("'''"),
        code.lines().any(|l| l.trim_start().starts_with('#')),
    ]);

    static DANGEROUS: Lazy<Vec<Regex>> = Lazy::new(|| {
        [r"eval\s*\(", r"exec\s*\(", r"os\.system\s*\(", r"subprocess\.call\s*\("]
            .iter()
            .map(|p| Regex::new(p).expect("valid regex"))
            .collect()
    });
    let issues = count_matches(code, &DANGEROUS) + count_matches(code, &HARDCODED_SECRET[..2]);

    Scorecard {
        completeness: Some(structure),
        consistency: Some(docs),
        security: Some(clamp(1.0 - issues as f64 * 0.2)),
        best_practices: Some(errors),
    }
}

fn score_javascript(code: &str) -> Scorecard {
    let structure = ratio(&[
        code.contains("const ") || code.contains("let "),
        code.contains("function ") || code.contains("=>"),
        code.matches("var ").count() < 3,
    ]);
    let errors = ratio(&[
        code.contains("try {") && code.contains("catch"),
        code.contains(".then(") || code.contains("async") || code.contains("await"),
    ]);
    let docs = ratio(&[code.contains("/**"), code.contains("//")]);

    static DANGEROUS: Lazy<Vec<Regex>> = Lazy::new(|| {
        [
            r"eval\s*\(",
            r"innerHTML\s*=",
            r"document\.write\s*\(",
            r#"setTimeout\s*\(\s*["']"#,
            r#"setInterval\s*\(\s*["']"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    });
    let mut issues = count_matches(code, &DANGEROUS);
    if code.contains("innerHTML") && !code.to_lowercase().contains("sanitize") {
        issues += 1;
    }

    Scorecard {
        completeness: Some(structure),
        consistency: Some(docs),
        security: Some(clamp(1.0 - issues as f64 * 0.25)),
        best_practices: Some(errors),
    }
}

fn score_java(code: &str) -> Scorecard {
    let structure = ratio(&[
        code.contains("package "),
        code.contains("class "),
        code.contains("import "),
    ]);
    let errors = ratio(&[
        code.contains("try {") && code.contains("catch"),
        code.contains("throws "),
    ]);
    let docs = ratio(&[code.contains("/**"), code.contains("//")]);
    let mut security: f64 = 0.7;
    if code.contains("PreparedStatement") {
        security += 0.2;
    }
    if code.contains("MessageDigest") || code.contains("SecureRandom") {
        security += 0.1;
    }

    Scorecard {
        completeness: Some(structure),
        consistency: Some(docs),
        security: Some(clamp(security)),
        best_practices: Some(errors),
    }
}

fn score_generic(code: &str) -> Scorecard {
    let non_empty: Vec<&str> = code.lines().filter(|l| !l.trim().is_empty()).collect();
    let structure = clamp(non_empty.len() as f64 / 30.0);
    let comments = non_empty
        .iter()
        .filter(|l| {
            let l = l.trim_start();
            l.starts_with("//") || l.starts_with('#') || l.starts_with("/*") || l.starts_with("<!--")
        })
        .count();
    let docs = clamp(comments as f64 / (non_empty.len() as f64 * 0.1).max(1.0));
    let issues = count_matches(code, &HARDCODED_SECRET);

    Scorecard {
        completeness: Some(structure),
        consistency: Some(docs),
        security: Some(clamp(1.0 - issues as f64 * 0.25)),
        best_practices: None,
    }
}

// --- Security review ---

/// Scores the code under review and folds in the reviewer's own verdict line.
pub fn score_security(code: &str, report: &str, language: Language) -> Scorecard {
    let vulnerabilities = common_vulnerabilities(code, language);
    let lower = code.to_lowercase();
    let hygiene = (auth_score(&lower) + input_validation_score(code) + encryption_score(&lower)) / 3.0;

    Scorecard {
        completeness: None,
        consistency: report_verdict(report),
        security: Some(clamp(1.0 - vulnerabilities as f64 * 0.1)),
        best_practices: Some(hygiene),
    }
}

pub fn common_vulnerabilities(code: &str, language: Language) -> usize {
    let mut found = usize::from(count_matches(code, &SQL_CONCAT) > 0);

    let dangerous: &[&str] = match language {
        Language::Python => &[r"os\.system\s*\(", r"subprocess\.call\s*\(", r"eval\s*\(", r"exec\s*\("],
        Language::Javascript | Language::Typescript => &[
            r"eval\s*\(",
            r"Function\s*\(",
            r#"setTimeout\s*\(\s*["']"#,
            r#"setInterval\s*\(\s*["']"#,
        ],
        Language::Java => &[r"Runtime\.exec\s*\(", r"ProcessBuilder\s*\("],
        Language::Php => &[r"eval\s*\(", r"exec\s*\(", r"system\s*\(", r"shell_exec\s*\("],
        Language::Go => &[r"exec\.Command\s*\("],
        Language::Csharp => &[r"Process\.Start\s*\("],
        Language::Rust => &[r"unsafe\s*\{", r"\.unwrap\(\)"],
    };
    found += dangerous
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .filter(|re| re.is_match(code))
        .count();

    if matches!(language, Language::Javascript | Language::Typescript | Language::Php)
        && !code.to_lowercase().contains("sanitize")
        && [r"innerHTML\s*=", r"document\.write\s*\(", r"echo\s+\$_"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .any(|re| re.is_match(code))
    {
        found += 1;
    }
    found
}

fn auth_score(lower: &str) -> f64 {
    let auth = keyword_hits(
        lower,
        &["authenticate", "authorization", "login", "token", "session", "jwt", "auth", "password", "credential"],
    );
    let secure = keyword_hits(lower, &["bcrypt", "hash", "salt", "scrypt", "argon2"]);
    clamp(0.3 + (auth + secure) as f64 * 0.1)
}

fn input_validation_score(code: &str) -> f64 {
    let lower = code.to_lowercase();
    let hits = keyword_hits(
        &lower,
        &["validate", "sanitize", "escape", "filter", "check", "verify", "clean", "strip", "trim", "regex"],
    );
    static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
        [r"if\s+.*\s+(len|length)\s*\(", r"isinstance\s*\(", r"match\s*\(", r"in\s+\[.*\]"]
            .iter()
            .map(|p| Regex::new(p).expect("valid regex"))
            .collect()
    });
    clamp(0.3 + hits as f64 * 0.1 + count_matches(code, &PATTERNS) as f64 * 0.05)
}

fn encryption_score(lower: &str) -> f64 {
    let hits = keyword_hits(
        lower,
        &["encrypt", "decrypt", "hash", "bcrypt", "sha", "aes", "ssl", "tls", "https", "crypto", "cipher"],
    );
    clamp(0.5 + hits as f64 * 0.08)
}

/// `Status: Approve` / `Status: Denied` lines written by the reviewing model.
fn report_verdict(report: &str) -> Option<f64> {
    let lower = report.to_lowercase();
    if lower.contains("status: approve") {
        Some(1.0)
    } else if lower.contains("status: denied") || lower.contains("status: deny") {
        Some(0.2)
    } else {
        None
    }
}

// --- Test cases ---

pub fn score_test_cases(tests: &str, code: &str) -> Scorecard {
    let quality = test_structure(tests);
    let variety = test_variety(tests);
    Scorecard {
        completeness: Some(test_coverage(tests, code)),
        consistency: Some((quality + variety) / 2.0),
        security: None,
        best_practices: Some(test_practices(tests)),
    }
}

fn test_coverage(tests: &str, code: &str) -> f64 {
    if tests.trim().is_empty() || code.trim().is_empty() {
        return 0.0;
    }
    let functions: usize = FUNCTION_DEF.iter().map(|re| re.find_iter(code).count()).sum();
    let test_count = [
        tests.matches("def test_").count(),
        tests.matches("test(").count(),
        tests.matches("it(").count(),
        tests.matches("@Test").count(),
        tests.matches("#[test]").count(),
        tests.matches("func Test").count(),
    ]
    .into_iter()
    .max()
    .unwrap_or(0);

    if functions == 0 {
        return if test_count > 0 { 0.5 } else { 0.0 };
    }
    clamp(test_count as f64 / (functions as f64 * 2.5))
}

fn test_structure(tests: &str) -> f64 {
    let lower = tests.to_lowercase();
    let score: f64 = [
        ("steps", 0.2),
        ("expected", 0.2),
        ("description", 0.15),
        ("setup", 0.15),
        ("assert", 0.15),
        ("expect", 0.15),
    ]
    .iter()
    .filter(|(marker, _)| lower.contains(marker))
    .map(|(_, weight)| weight)
    .sum();
    clamp(score)
}

fn test_variety(tests: &str) -> f64 {
    let lower = tests.to_lowercase();
    let kinds = keyword_hits(
        &lower,
        &["unit", "integration", "e2e", "performance", "security", "negative", "edge"],
    );
    clamp(kinds as f64 / 4.0)
}

fn test_practices(tests: &str) -> f64 {
    let lower = tests.to_lowercase();
    let score: f64 = 0.4
        + [
            ("edge", 0.15),
            ("boundary", 0.15),
            ("negative", 0.15),
            ("invalid", 0.1),
            ("setup", 0.1),
            ("teardown", 0.1),
            ("mock", 0.1),
            ("stub", 0.1),
        ]
        .iter()
        .filter(|(marker, _)| lower.contains(marker))
        .map(|(_, weight)| weight)
        .sum::<f64>();
    clamp(score)
}

// --- QA ---

pub fn score_qa(report: &str) -> Scorecard {
    let lower = report.to_lowercase();
    let passed = lower.matches("passed").count();
    let failed = lower.matches("failed").count();
    let pass_rate = if passed + failed == 0 {
        0.5
    } else {
        passed as f64 / (passed + failed) as f64
    };

    let critical = keyword_hits(
        &lower,
        &["crash", "critical", "blocker", "security breach", "data loss", "corruption", "severe", "fatal"],
    );
    let positive = keyword_hits(&lower, &["fast", "quick", "responsive", "efficient", "optimized"]);
    let negative = keyword_hits(&lower, &["slow", "timeout", "lag", "delay", "bottleneck", "memory leak"]);
    let performance = clamp(0.6 + positive as f64 * 0.08 - negative as f64 * 0.15);

    Scorecard {
        completeness: Some(pass_rate),
        consistency: Some(clamp(1.0 - critical as f64 * 0.2)),
        security: None,
        best_practices: Some(performance),
    }
}

// --- Feedback ---

/// Reviewer-style notes explaining the weak components of a scorecard.
pub fn feedback_for(stage: Stage, card: &Scorecard, language: Language) -> String {
    let low = |score: Option<f64>| score.is_some_and(|s| s < 0.7);
    let mut notes: Vec<String> = Vec::new();

    match stage {
        Stage::UserStories => {
            if low(card.completeness) {
                notes.push("Some stories are missing the 'As a ... I want ... so that ...' format".into());
            }
            if low(card.consistency) {
                notes.push("Stories should cover more of the stated requirements".into());
            }
            if low(card.best_practices) {
                notes.push("Make stories concise, unique and testable".into());
            }
        }
        Stage::DesignDocument => {
            if low(card.completeness) {
                notes.push("Add more functional and technical detail".into());
            }
            if low(card.consistency) {
                notes.push("Make sure every user story is addressed by the design".into());
            }
            if low(card.security) {
                notes.push("Cover authentication, encryption and access control".into());
            }
            if low(card.best_practices) {
                notes.push("Describe APIs, data model, error handling and deployment".into());
            }
        }
        Stage::Code => {
            if low(card.completeness) {
                notes.push(format!("Improve the project structure for {language} conventions"));
            }
            if low(card.security) {
                notes.push("Remove dangerous calls and hardcoded credentials".into());
            }
            if low(card.best_practices) {
                notes.push("Add error handling and logging".into());
            }
            if low(card.consistency) {
                notes.push("Document modules and public functions".into());
            }
        }
        Stage::SecurityReview => {
            if low(card.security) {
                notes.push("Potential injection or command execution patterns remain in the code".into());
            }
            if low(card.best_practices) {
                notes.push("Strengthen authentication, input validation and encryption".into());
            }
            if low(card.consistency) {
                notes.push("The security reviewer did not approve the code".into());
            }
        }
        Stage::TestCases => {
            if low(card.completeness) {
                notes.push("Add tests until every function is covered".into());
            }
            if low(card.consistency) {
                notes.push("Give each test steps, expected results and a type".into());
            }
            if low(card.best_practices) {
                notes.push("Add edge, boundary and negative cases".into());
            }
        }
        Stage::Qa => {
            if low(card.completeness) {
                notes.push("Failing tests must be fixed before deployment".into());
            }
            if low(card.consistency) {
                notes.push("Critical failures were reported".into());
            }
            if low(card.best_practices) {
                notes.push("Performance problems were reported".into());
            }
        }
        Stage::Requirements | Stage::Deployment => {}
    }

    if notes.is_empty() {
        format!("{} meets the quality bar", stage.title())
    } else {
        notes.join(". ")
    }
}
