//! Bounded diagnostic excerpts from toolchain output

use regex::Regex;

/// Keep the part of a build log worth putting in a notification.
///
/// Prefers the last `max_lines` diagnostic lines mentioning an error; falls
/// back to the last `max_lines` lines of the whole log. The result never
/// exceeds `max_chars` characters and keeps the end of the log when cut.
pub fn bounded_tail(output: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();

    let errors = error_lines(&lines);
    let chosen = if errors.is_empty() { lines } else { errors };
    let start = chosen.len().saturating_sub(max_lines);
    truncate_front(&dedup(&chosen[start..]).join("\n"), max_chars)
}

fn error_lines<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let Some(error) = Regex::new(r"(?i)\berror\b").ok() else {
        return Vec::new();
    };
    // MSBuild's "0 Error(s)" summary is not a diagnostic
    let summary = Regex::new(r"(?i)^\s*0\s+error\(s\)").ok();

    lines
        .iter()
        .copied()
        .filter(|l| error.is_match(l))
        .filter(|l| summary.as_ref().map_or(true, |s| !s.is_match(l)))
        .collect()
}

/// MSBuild repeats every diagnostic in its closing summary
fn dedup<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let mut seen = std::collections::HashSet::new();
    let mut kept: Vec<&str> = lines
        .iter()
        .rev()
        .copied()
        .filter(|l| seen.insert(l.trim()))
        .collect();
    kept.reverse();
    kept
}

/// Last `max_chars` characters of `text`
pub fn truncate_front(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
