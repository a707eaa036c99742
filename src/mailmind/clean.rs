//! Post-processing for model output: strips labels like "Here is a summary:".
//! Each table entry is applied once, in order, to the trimmed text.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Summary,
    Reply,
}

const LEADING_PREFACE: &str = r"(?i)^(here\s*is|here'?s|this\s*is|below\s*is)\b[\s\S]{0,80}?:\s*";

const SUMMARY_PATTERNS: [(&str, &str); 3] = [
    (LEADING_PREFACE, ""),
    (r"(?i)^\s*(summary|tl;dr)\s*:\s*", ""),
    (r"(?i)^\s*in\s*\d+\s*(?:-?\s*)?sentences\s*:\s*", ""),
];

const REPLY_PATTERNS: [(&str, &str); 3] = [
    (LEADING_PREFACE, ""),
    (
        r"(?i)^\s*(a\s*)?concise(,|\s)+professional\s+reply\b[\s\S]*?:\s*",
        "",
    ),
    (r"(?i)^\s*(reply|response)\s*:\s*", ""),
];

static SUMMARY_TABLE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
static REPLY_TABLE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
            Ok(re) => Some((re, *replacement)),
            Err(err) => {
                log::error!("output cleaning pattern `{pattern}` is invalid: {err}");
                None
            }
        })
        .collect()
}

fn table(kind: OutputKind) -> &'static [(Regex, &'static str)] {
    match kind {
        OutputKind::Summary => SUMMARY_TABLE.get_or_init(|| compile(&SUMMARY_PATTERNS)),
        OutputKind::Reply => REPLY_TABLE.get_or_init(|| compile(&REPLY_PATTERNS)),
    }
}

pub fn clean_output(kind: OutputKind, raw: &str) -> String {
    let mut text = raw.trim().to_string();
    for (re, replacement) in table(kind) {
        text = re.replace(&text, *replacement).into_owned();
    }
    text.trim().to_string()
}
