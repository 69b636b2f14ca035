//! Middle-trimming for messages that exceed the chat ceiling. Both ends of
//! the payload are preserved; the cut is marked exactly once.

/// Marker inserted where the middle of an over-ceiling message was removed.
pub const TRIM_MARKER: &str = "\n… [output trimmed] …\n";

/// Trims `text` to at most `max_chars` code points by removing the middle.
///
/// Returns the (possibly trimmed) text and, when trimming happened, the
/// original code-point count.
pub fn truncate_middle(text: &str, max_chars: usize) -> (String, Option<usize>) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), None);
    }

    let marker_len = TRIM_MARKER.chars().count();
    if max_chars <= marker_len {
        // Ceiling too small to fit the marker and any payload; keep the head.
        return (text.chars().take(max_chars).collect(), Some(total));
    }

    let budget = max_chars - marker_len;
    let head_len = budget / 2;
    let tail_len = budget - head_len;

    let mut out = String::with_capacity(max_chars * 4);
    out.extend(text.chars().take(head_len));
    out.push_str(TRIM_MARKER);
    out.extend(text.chars().skip(total - tail_len));
    (out, Some(total))
}
