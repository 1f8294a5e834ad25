// ---------------------------------------------------------------------------
// Sensitive-text masking
// ---------------------------------------------------------------------------
//
// Applied to every message and target that reaches a log line or a report.
// Masking an already masked string leaves it unchanged.

use std::sync::LazyLock;

use regex::Regex;

/// Replacement for target addresses in persisted reports.
pub const MASKED_TARGET: &str = "[MASKED]";

static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r#"(?i)password["\s]*:["\s]*[^"}\s]+"#, "password: *****"),
        (r#"(?i)session[_\s]?id["\s]*:["\s]*[^"}\s]+"#, "session_id: *****"),
        (r#"(?i)token["\s]*:["\s]*[^"}\s]+"#, "token: *****"),
        (r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b", "[MASKED_IP]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("mask pattern compiles"),
            replacement,
        )
    })
    .collect()
});

/// Hide passwords, tokens, session ids and dotted-quad addresses.
pub fn mask(text: &str) -> String {
    RULES
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}
