//! Description section composition.
//!
//! Enricher contributions are delimited by blank lines. A contribution with
//! a stable header (e.g. `⏱️ Intervals:`) replaces the existing section
//! with that header instead of appending, which keeps destination-side
//! updates idempotent across reposts.

/// Append a paragraph to a description with a blank-line divider.
pub fn append_paragraph(description: &str, paragraph: &str) -> String {
    let trimmed = description.trim_end();
    if trimmed.is_empty() {
        return paragraph.to_string();
    }
    format!("{trimmed}\n\n{paragraph}")
}

/// Insert or replace the section identified by `header`. The section body
/// is everything from the header line to the next blank line.
pub fn apply_section(description: &str, header: &str, body: &str) -> String {
    let section = if body.is_empty() {
        header.to_string()
    } else {
        format!("{header}\n{body}")
    };

    let mut parts: Vec<&str> = if description.trim().is_empty() {
        Vec::new()
    } else {
        description.split("\n\n").collect()
    };

    match parts.iter().position(|p| p.trim_start().starts_with(header)) {
        Some(idx) => {
            parts[idx] = &section;
            parts.join("\n\n")
        }
        None => {
            parts.push(&section);
            parts.join("\n\n")
        }
    }
}
