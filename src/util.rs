//! Utility functions shared by the loader and the LIT writer.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Get a time-based seed value for pseudo-random number generation.
pub fn time_seed_nanos() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(12345)
}

/// Get current time as seconds since Unix epoch.
pub fn time_now_secs() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Generate a random-looking GUID in registry format: `XXXXXXXX-XXXX-4XXX-YXXX-XXXXXXXXXXXX`.
///
/// Uses the same LCG walk as other time-seeded identifiers in the crate; the
/// value only needs to be unique per written book, not unpredictable.
pub fn new_guid() -> String {
    let seed = time_seed_nanos();
    let bytes: Vec<u8> = (0..16u64)
        .map(|i| {
            let mut x = seed.wrapping_add(i.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            x = x.wrapping_mul(6364136223846793005);
            x = x.wrapping_add(1442695040888963407);
            (x >> 33) as u8
        })
        .collect();

    let mut b = [0u8; 16];
    b.copy_from_slice(&bytes);
    // Version 4, RFC 4122 variant
    b[6] = (b[6] & 0x0F) | 0x40;
    b[8] = (b[8] & 0x3F) | 0x80;

    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
        b[14], b[15]
    )
}

/// Decode bytes to a string, handling various encodings.
///
/// This function:
/// 1. First tries UTF-8 (handles BOM automatically via encoding_rs)
/// 2. If malformed, tries the hint encoding (from `<?xml encoding="..."?>`)
/// 3. Falls back to Windows-1252 (common in old ebooks)
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Extract encoding from XML declaration.
///
/// Parses `<?xml ... encoding="..." ?>` in the first 100 bytes.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let check_len = bytes.len().min(100);
    let prefix = &bytes[..check_len];

    let xml_start = prefix.windows(5).position(|w| w == b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    if after_enc.is_empty() {
        return None;
    }

    let quote = after_enc[0];
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;
    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

// ============================================================================
// URL / href helpers
// ============================================================================

/// Check whether a URL carries a scheme (`http:`, `mailto:`, ...).
pub fn has_scheme(url: &str) -> bool {
    match url.find(':') {
        Some(pos) => {
            let scheme = &url[..pos];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !url[..pos].contains('/')
        }
        None => false,
    }
}

/// Split `path#fragment` into its two halves. The fragment excludes the `#`.
pub fn split_fragment(url: &str) -> (&str, Option<&str>) {
    match url.find('#') {
        Some(pos) => (&url[..pos], Some(&url[pos + 1..])),
        None => (url, None),
    }
}

/// Normalize an href: trim surrounding whitespace and percent-decode.
pub fn normalize_href(href: &str) -> String {
    let trimmed = href.trim();
    percent_decode_str(trimmed).decode_utf8_lossy().into_owned()
}

/// Resolve `rel` against the href of the document that contains it.
///
/// Both are book-relative paths. `.` and `..` segments are collapsed; a
/// leading `/` makes `rel` book-absolute. An empty `rel` resolves to `base`.
pub fn resolve_href(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        return base.to_string();
    }
    if has_scheme(rel) {
        return rel.to_string();
    }

    let mut segments: Vec<&str> = Vec::new();
    if !rel.starts_with('/') {
        if let Some(pos) = base.rfind('/') {
            segments.extend(base[..pos].split('/').filter(|s| !s.is_empty()));
        }
    }

    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut joined = segments.join("/");
    if rel.ends_with('/') && !joined.is_empty() {
        joined.push('/');
    }
    joined
}

// ============================================================================
// Resource Format Detection
// ============================================================================

/// Detected resource format, by extension or magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Jpeg,
    Png,
    Gif,
    Svg,
    Css,
    Xhtml,
    Binary,
}

impl MediaFormat {
    /// Get the MIME type string for this format.
    pub fn mime_type(self) -> &'static str {
        match self {
            MediaFormat::Jpeg => "image/jpeg",
            MediaFormat::Png => "image/png",
            MediaFormat::Gif => "image/gif",
            MediaFormat::Svg => "image/svg+xml",
            MediaFormat::Css => "text/css",
            MediaFormat::Xhtml => "application/xhtml+xml",
            MediaFormat::Binary => "application/octet-stream",
        }
    }
}

/// Detect resource format from file path and/or raw bytes.
///
/// Extension-based detection runs first, then magic bytes.
pub fn detect_media_format(path: &str, data: &[u8]) -> MediaFormat {
    let path_lower = path.to_lowercase();

    if path_lower.ends_with(".jpg") || path_lower.ends_with(".jpeg") {
        return MediaFormat::Jpeg;
    }
    if path_lower.ends_with(".png") {
        return MediaFormat::Png;
    }
    if path_lower.ends_with(".gif") {
        return MediaFormat::Gif;
    }
    if path_lower.ends_with(".svg") {
        return MediaFormat::Svg;
    }
    if path_lower.ends_with(".css") {
        return MediaFormat::Css;
    }
    if path_lower.ends_with(".xhtml") || path_lower.ends_with(".html") || path_lower.ends_with(".htm")
    {
        return MediaFormat::Xhtml;
    }

    if data.len() >= 4 {
        if data[0] == 0xFF && data[1] == 0xD8 {
            return MediaFormat::Jpeg;
        }
        if data[0] == 0x89 && data[1] == 0x50 && data[2] == 0x4E && data[3] == 0x47 {
            return MediaFormat::Png;
        }
        if data[0] == 0x47 && data[1] == 0x49 && data[2] == 0x46 {
            return MediaFormat::Gif;
        }
    }

    MediaFormat::Binary
}

/// Truncate an ISO date/timestamp to just the date portion (YYYY-MM-DD).
pub fn truncate_to_date(s: &str) -> String {
    if let Some(t_pos) = s.find('T') {
        s[..t_pos].to_string()
    } else {
        s.to_string()
    }
}
