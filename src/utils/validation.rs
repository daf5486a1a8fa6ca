/// Longest sanitized filename kept in a store key, in bytes
const MAX_FILENAME_LEN: usize = 128;

/// Reduce a client-supplied filename to a single safe path component.
///
/// Directory parts are dropped, reserved and control characters become `_`,
/// whitespace becomes `_` and leading dots are stripped. Returns `None`
/// when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Clients on Windows send backslash-separated paths
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from upload filename: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c.is_whitespace()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.');

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        &sanitized[..end]
    } else {
        sanitized
    };

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '_') {
        None
    } else {
        Some(sanitized.to_string())
    }
}

/// Interpret a form flag the way browsers and curl users send it.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
