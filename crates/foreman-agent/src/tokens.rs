// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Approximate token counting and length-limited prompt shaping.
//!
//! The estimate is a deliberate over-count for ASCII-heavy input (4 chars per
//! token plus one) and is used only as a safety heuristic — never for
//! billing-accurate accounting.

/// Marker inserted where truncation removed text.
pub const TRUNCATION_MARKER: &str = "\n[... truncated ...]\n";

/// Approximate token count: `chars/4 + 1`, 0 for empty or whitespace-only
/// input.
pub fn estimate(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    text.chars().count() / 4 + 1
}

/// Shape `text` to fit within `max_tokens`, keeping content from both ends.
///
/// Single-line input keeps a character prefix and suffix joined by the
/// truncation marker.  Multi-line input keeps whole lines from the start and
/// end and records how many lines were dropped.  The result is re-checked
/// and, if the line-based walk overshot, the call recurses with 90% of the
/// budget.  Character boundaries are always respected.
pub fn truncate(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return String::new();
    }
    if estimate(text) <= max_tokens {
        return text.to_string();
    }

    let available = max_tokens.saturating_sub(estimate(TRUNCATION_MARKER));
    let result = if text.contains('\n') {
        truncate_lines(text, available)
    } else {
        truncate_single_line(text, available)
    };

    if estimate(&result) > max_tokens {
        return truncate(text, max_tokens * 9 / 10);
    }
    result
}

fn truncate_single_line(text: &str, available: usize) -> String {
    let keep = (available / 2) * 4;
    let chars: Vec<char> = text.chars().collect();
    if keep == 0 || chars.len() <= keep * 2 {
        return String::new();
    }
    let prefix: String = chars[..keep].iter().collect();
    let suffix: String = chars[chars.len() - keep..].iter().collect();
    format!("{prefix}{TRUNCATION_MARKER}{suffix}")
}

fn truncate_lines(text: &str, available: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let head_budget = available / 2;
    let tail_budget = available / 2;

    let mut head_end = 0;
    let mut used = 0;
    for (i, line) in lines.iter().enumerate() {
        let cost = estimate(line);
        if used + cost > head_budget {
            break;
        }
        used += cost;
        head_end = i + 1;
    }

    let mut tail_start = lines.len();
    let mut used = 0;
    for (i, line) in lines.iter().enumerate().rev() {
        // Refuse overlap with the head span.
        if i < head_end {
            break;
        }
        let cost = estimate(line);
        if used + cost > tail_budget {
            break;
        }
        used += cost;
        tail_start = i;
    }

    let dropped = tail_start - head_end;
    if dropped == 0 {
        return text.to_string();
    }
    format!(
        "{}\n[... truncated {dropped} lines ...]\n{}",
        lines[..head_end].join("\n"),
        lines[tail_start..].join("\n"),
    )
}

/// Paragraph-based fallback: keep the first and last paragraphs (each bounded
/// to half the budget) and note how many were omitted.  Falls back to
/// [`truncate`] when even the marker does not fit.
pub fn summarize(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return String::new();
    }
    if estimate(text) <= max_tokens {
        return text.to_string();
    }

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    if paragraphs.len() < 3 {
        return truncate(text, max_tokens);
    }

    let half = max_tokens / 2;
    let first = truncate(paragraphs[0], half);
    let last = truncate(paragraphs[paragraphs.len() - 1], half);
    let omitted = paragraphs.len() - 2;
    let result = format!("{first}\n\n[... {omitted} paragraphs omitted ...]\n\n{last}");

    if estimate(&result) > max_tokens {
        return truncate(text, max_tokens);
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
