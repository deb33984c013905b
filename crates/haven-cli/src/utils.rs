//! Shared utilities

use haven_chat::Citation;

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Render citations as a "Sources" list, or nothing if there are none
pub fn format_sources(citations: &[Citation]) -> Option<String> {
    if citations.is_empty() {
        return None;
    }
    let lines: Vec<String> = citations
        .iter()
        .map(|c| format!("  - {}: \"{}\"", c.filename, c.quote))
        .collect();
    Some(format!("Sources:\n{}", lines.join("\n")))
}
