//! MIME decoding.
//!
//! Turns raw RFC 5322 messages, or the structure-only tree reported by the
//! server, into envelope fields, body text and attachment records.

mod decode;
mod parser;
mod part;

use thiserror::Error;

pub use decode::{
    decode_base64, html_to_text, normalize_content_id, sanitize_bytes, sanitize_text, snippet,
    Base64Outcome, SNIPPET_CHARS,
};
pub use parser::{
    attachments_from_structure, parse_address_list, parse_headers, parse_message,
    parse_structure, preview_text, ExtractedAttachment, MessageHeaders, ParsedMessage,
};
pub use part::{is_binary_type, Disposition, Leaf, LeafRole, Multipart, Part, PartVisitor};

/// Errors raised while parsing a message.
#[derive(Debug, Error)]
pub enum MimeError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] mailparse::MailParseError),
}

/// Result type for MIME operations.
pub type Result<T> = std::result::Result<T, MimeError>;
