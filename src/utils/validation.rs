use thiserror::Error;

/// Longest object-name component accepted, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

/// Reduces a client-supplied filename to a single safe key component.
///
/// Directory parts (either separator) are dropped, reserved characters are
/// replaced with `_` and the result is cut to [`MAX_FILENAME_LEN`] bytes on a
/// char boundary.
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name != filename.trim() {
        tracing::warn!("Path components stripped from filename: {}", filename);
    }

    if name.is_empty() || name == "." || name == ".." {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';') {
                '_'
            } else {
                c
            }
        })
        .collect();

    Ok(truncate_utf8(&sanitized, MAX_FILENAME_LEN).to_string())
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
