//! Helpers for keeping log lines and stored messages bounded and free of
//! credentials.

/// Truncates `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Shortens a provider error body before it goes into an error message.
pub fn sanitize_error_body(body: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        format!(
            "{}... (truncated)",
            truncate_chars(trimmed, MAX_ERROR_BODY_CHARS)
        )
    } else {
        trimmed.to_string()
    }
}

/// Drops the query string from a URL. Provider keys travel as query
/// parameters, so request URLs are only ever logged through this.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?<redacted>", base),
        None => url.to_string(),
    }
}
