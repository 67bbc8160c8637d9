//! Transfer decoding and text normalization helpers.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use ring::digest;

/// Snippet length in characters.
pub const SNIPPET_CHARS: usize = 150;

/// Bytes hashed for the attachment dedupe key.
const PREFIX_HASH_BYTES: usize = 1024;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Outcome of decoding a base64 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Base64Outcome {
    /// Decoded on the first attempt.
    Clean(Vec<u8>),
    /// Decoded after stripping whitespace.
    Repaired(Vec<u8>),
    /// Could not be decoded; the raw bytes are returned.
    Raw(Vec<u8>),
}

impl Base64Outcome {
    /// Returns the bytes regardless of how they were obtained.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Clean(b) | Self::Repaired(b) | Self::Raw(b) => b,
        }
    }
}

/// Decodes a base64 body.
///
/// Line breaks are removed first. If that fails every whitespace byte is
/// stripped and a lenient decode is tried once; after that the raw bytes
/// are kept.
pub fn decode_base64(raw: &[u8]) -> Base64Outcome {
    let joined: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| *b != b'\r' && *b != b'\n')
        .collect();
    if let Ok(bytes) = STANDARD.decode(&joined) {
        return Base64Outcome::Clean(bytes);
    }

    let stripped: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match LENIENT.decode(&stripped) {
        Ok(bytes) => Base64Outcome::Repaired(bytes),
        Err(_) => Base64Outcome::Raw(raw.to_vec()),
    }
}

/// Converts bytes to a string, dropping invalid UTF-8 sequences and NULs.
pub fn sanitize_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let skip = err.error_len().unwrap_or(after.len());
                rest = &after[skip..];
            }
        }
    }
    out.retain(|c| c != '\0');
    out
}

/// Removes NULs and replacement characters from already decoded text.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\0' && *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Line width handed to the HTML renderer. Snippets collapse whitespace,
/// so wrapping only matters for stored text.
const HTML_RENDER_WIDTH: usize = 80;

/// Renders HTML to plain text without markup decoration.
///
/// Entities are decoded and `script`/`style` content is dropped. Input the
/// renderer rejects is returned unchanged.
pub fn html_to_text(html: &str) -> String {
    html2text::config::with_decorator(html2text::render::TrivialDecorator::new())
        .string_from_read(html.as_bytes(), HTML_RENDER_WIDTH)
        .unwrap_or_else(|_| html.to_string())
}

/// Builds a preview: whitespace collapsed, at most [`SNIPPET_CHARS`] chars.
pub fn snippet(text: &str) -> String {
    let mut out = String::new();
    let mut count = 0;
    for word in text.split_whitespace() {
        if count >= SNIPPET_CHARS {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
            count += 1;
        }
        for c in word.chars() {
            if count >= SNIPPET_CHARS {
                break;
            }
            out.push(c);
            count += 1;
        }
    }
    out.trim_end().to_string()
}

/// File extension for a content type, used for generated filenames.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/json" => "json",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "text/calendar" => "ics",
        "message/rfc822" => "eml",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

/// Filename used when a part carries none.
pub fn generated_filename(content_type: &str) -> String {
    format!("noname.{}", extension_for(content_type))
}

/// Hex SHA-256 of the first bytes of `content`, for attachment dedupe.
pub fn prefix_hash(content: &[u8]) -> String {
    let end = content.len().min(PREFIX_HASH_BYTES);
    let hash = digest::digest(&digest::SHA256, &content[..end]);
    hash.as_ref()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Strips surrounding whitespace and angle brackets from a Content-ID.
pub fn normalize_content_id(raw: &str) -> Option<String> {
    let cid = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if cid.is_empty() {
        None
    } else {
        Some(cid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_clean_with_line_breaks() {
        let outcome = decode_base64(b"SGVsbG8s\r\nIHdvcmxk\r\n");
        assert_eq!(outcome, Base64Outcome::Clean(b"Hello, world".to_vec()));
    }

    #[test]
    fn base64_repaired_after_stripping_whitespace() {
        // Whitespace inside the encoded run.
        let outcome = decode_base64(b"SGVs bG8\t=");
        assert_eq!(outcome, Base64Outcome::Repaired(b"Hello".to_vec()));
    }

    #[test]
    fn base64_falls_back_to_raw() {
        let outcome = decode_base64(b"@@not base64!!");
        assert_eq!(outcome, Base64Outcome::Raw(b"@@not base64!!".to_vec()));
    }

    #[test]
    fn sanitize_drops_invalid_sequences() {
        let bytes = b"caf\xc3\xa9 \xff\xfebar\x00";
        assert_eq!(sanitize_bytes(bytes), "café bar");
    }

    #[test]
    fn snippet_collapses_whitespace_and_truncates() {
        let text = format!("Hello   \r\n\tthere\n\n{}", "x".repeat(400));
        let s = snippet(&text);
        assert!(s.starts_with("Hello there x"));
        assert_eq!(s.chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn html_to_text_strips_markup() {
        let text = html_to_text("<style>p{}</style><p>Hi&nbsp;<b>you</b></p>");
        assert_eq!(snippet(&text), "Hi you");
    }

    #[test]
    fn html_entities_are_decoded() {
        let text = html_to_text("<p>It&#8217;s &eacute;t&eacute; &mdash; 5 &lt; 6</p>");
        assert_eq!(snippet(&text), "It\u{2019}s \u{e9}t\u{e9} \u{2014} 5 < 6");
    }

    #[test]
    fn generated_names_follow_content_type() {
        assert_eq!(generated_filename("image/png"), "noname.png");
        assert_eq!(generated_filename("application/x-unknown"), "noname.bin");
    }

    #[test]
    fn prefix_hash_ignores_tail() {
        let mut a = vec![1u8; 2048];
        let b = a.clone();
        a[2000] = 9;
        assert_eq!(prefix_hash(&a), prefix_hash(&b));
        assert_ne!(prefix_hash(b"one"), prefix_hash(b"two"));
    }

    #[test]
    fn content_id_normalization() {
        assert_eq!(normalize_content_id(" <img1@x> ").as_deref(), Some("img1@x"));
        assert_eq!(normalize_content_id("<>"), None);
    }
}
