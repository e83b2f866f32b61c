//! Human-readable formatting for status lines.

/// Format a duration as minutes and seconds, e.g. `5m 0s`.
pub fn format_minutes(seconds: u64) -> String {
    format!("{}m {}s", seconds / 60, seconds % 60)
}

/// Format a long duration as days, hours and minutes, skipping zero parts.
///
/// Anything under a minute reads `Less than a minute`.
pub fn format_days(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;

    let mut parts = Vec::with_capacity(3);
    if days > 0 {
        parts.push(format!("{} days", days));
    }
    if hours > 0 {
        parts.push(format!("{} hours", hours));
    }
    if minutes > 0 {
        parts.push(format!("{} minutes", minutes));
    }

    if parts.is_empty() {
        "Less than a minute".to_string()
    } else {
        parts.join(" ")
    }
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
