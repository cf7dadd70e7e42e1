//! Command text normalization and raw modem output cleanup.

pub const DEFAULT_COMMAND_PREFIX: &str = "AT";

const STATUS_MARKERS: [&str; 2] = ["OK", "ERROR"];

/// Prepends `prefix` unless `text` already starts with it (case-insensitive).
pub fn normalize_command_text(text: &str, prefix: &str) -> String {
    let trimmed = text.trim();
    if starts_with_ignore_case(trimmed, prefix) {
        return trimmed.to_string();
    }
    format!("{prefix}{trimmed}")
}

pub fn extract_output(raw_output: &str) -> String {
    extract_output_with_prefix(raw_output, DEFAULT_COMMAND_PREFIX)
}

/// Drops echoed command lines, bare status markers and blank lines.
pub fn extract_output_with_prefix(raw_output: &str, prefix: &str) -> String {
    raw_output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !STATUS_MARKERS.contains(line))
        .filter(|line| prefix.is_empty() || !starts_with_ignore_case(line, prefix))
        .collect::<Vec<_>>()
        .join("\n")
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
