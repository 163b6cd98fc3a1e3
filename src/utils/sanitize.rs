/// Maximum length of a stored filename, in bytes.
pub const FILENAME_MAX_LEN: usize = 200;

/// Strips control characters and collapses runs of whitespace.
pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns an arbitrary name into a single path-safe segment.
///
/// Only ASCII alphanumerics, `-`, `_` and `.` survive; everything else
/// becomes `_`. Leading dots are dropped so the result can never be `..`
/// or a hidden file. Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(name.len());
    let mut last_was_replacement = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
            cleaned.push(ch);
            last_was_replacement = false;
        } else if !last_was_replacement {
            cleaned.push('_');
            last_was_replacement = true;
        }
    }

    let trimmed = cleaned
        .trim_start_matches(|ch| ch == '.' || ch == '_')
        .trim_end_matches('_');
    if trimmed.is_empty() {
        return None;
    }

    let mut result = trimmed.to_string();
    if result.len() > FILENAME_MAX_LEN {
        // Keep the extension when truncating.
        let extension = result
            .rfind('.')
            .map(|pos| result[pos..].to_string())
            .filter(|ext| ext.len() < 16)
            .unwrap_or_default();
        result.truncate(FILENAME_MAX_LEN - extension.len());
        result.push_str(&extension);
    }

    Some(result)
}

/// Masks an email address for logging, keeping the first character and the domain.
pub fn mask_email(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}****@{}", first, domain)
        }
        _ => "****".to_string(),
    }
}

/// Escapes text interpolated into an HTML email body.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
