//! Lossy brief shortening for prompt size control.

/// Appended when a brief had to be shortened.
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// Shorten `text` to roughly `max_chars` characters.
///
/// Texts within budget are returned unchanged. Otherwise fenced code blocks
/// are dropped, prose lines are kept until the budget is reached, and the
/// truncation marker is appended on its own line.
pub fn summarize_brief(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut in_fence = false;
    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        kept.push(line);
        used += line.chars().count() + 1;
        if used > max_chars {
            break;
        }
    }

    let joined = kept.join("\n");
    let summary = joined.trim();
    let summary: String = if summary.chars().count() > max_chars {
        summary.chars().take(max_chars).collect::<String>().trim_end().to_string()
    } else {
        summary.to_string()
    };
    format!("{summary}\n{TRUNCATION_MARKER}")
}
