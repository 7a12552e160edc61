use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Number of leading bytes inspected when sniffing.
pub const SNIFF_LEN: usize = 512;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Detects a MIME type from leading content bytes.
///
/// Magic numbers win; otherwise UTF-8 text without control characters is
/// `text/plain`; anything else is `application/octet-stream`.
pub fn sniff(bytes: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type();
    }

    if looks_like_text(bytes) {
        "text/plain"
    } else {
        OCTET_STREAM
    }
}

fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }

    // A sniff window may cut a multi-byte sequence at its end.
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return false,
    };

    !text.is_empty()
        && !text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

/// Sniffs the first [`SNIFF_LEN`] bytes of a local file.
pub async fn sniff_file(path: &Path) -> std::io::Result<&'static str> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(sniff(&head))
}

/// Content type for a relayed object: the store's own value unless it is
/// missing or generic, then a guess from the key's extension.
pub fn resolve(stored: Option<&str>, key: &str) -> String {
    match stored {
        Some(ct) if !ct.is_empty() && ct != OCTET_STREAM && ct != "binary/octet-stream" => {
            ct.to_string()
        }
        _ => mime_guess::from_path(key)
            .first_raw()
            .unwrap_or(OCTET_STREAM)
            .to_string(),
    }
}

/// `Content-Disposition` value for serving `filename`.
///
/// Media, text and PDF render inline; everything else downloads.
pub fn content_disposition(filename: &str, content_type: &str) -> String {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect::<String>();
    let fallback_filename = if ascii_filename.is_empty() {
        "file"
    } else {
        &ascii_filename
    };

    // RFC 5987
    let encoded_filename = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();

    let disposition_type = if content_type.starts_with("video/")
        || content_type.starts_with("audio/")
        || content_type.starts_with("image/")
        || content_type.starts_with("text/")
        || content_type == "application/pdf"
    {
        "inline"
    } else {
        "attachment"
    };

    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition_type, fallback_filename, encoded_filename
    )
}
