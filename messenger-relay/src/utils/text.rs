//! Text helpers for outbound messages and cache keys.

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// Splitting is done on `char` boundaries so multi-byte text is never cut
/// mid-character. Empty input yields no chunks.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for c in text.chars() {
        current.push(c);
        count += 1;
        if count == chunk_size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Truncate `text` to `max_chars` characters, ending with `...` when cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let budget = max_chars.saturating_sub(3);
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}...")
}

/// Parse a leading slash command such as `/img a red fox`.
///
/// Returns the lowercased command name and the (possibly empty) remainder.
pub fn extract_command(text: &str) -> Option<(String, String)> {
    let rest = text.trim().strip_prefix('/')?;
    let (name, remainder) = match rest.split_once(char::is_whitespace) {
        Some((name, remainder)) => (name, remainder.trim()),
        None => (rest, ""),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    Some((name.to_ascii_lowercase(), remainder.to_string()))
}

/// Reduce a subject identifier to characters safe for a file name.
///
/// Keeps ASCII alphanumerics, `-` and `_`; everything else is dropped. The
/// result may be empty, in which case the subject is not cacheable.
pub fn sanitize_key(subject: &str) -> String {
    subject
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(128)
        .collect()
}
