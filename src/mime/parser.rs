//! Message parsing on top of `mailparse`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mailparse::body::Body;
use mailparse::{DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail};
use tracing::debug;

use super::decode::{
    decode_base64, generated_filename, html_to_text, normalize_content_id, prefix_hash,
    sanitize_bytes, sanitize_text, snippet, Base64Outcome,
};
use super::part::{Disposition, Leaf, LeafRole, Multipart, Part, PartVisitor};
use super::Result;
use crate::domain::{Address, MessageId};

/// Envelope fields read from a header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub message_id: Option<MessageId>,
    pub in_reply_to: Option<MessageId>,
    pub references: Vec<MessageId>,
    pub from: Option<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub reply_to: Option<Address>,
    pub subject: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// An attachment found in a message.
///
/// `data` is only present when the part was decoded from a full message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAttachment {
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
    pub size: u64,
    pub data: Option<Vec<u8>>,
}

/// A fully decoded message.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub headers: MessageHeaders,
    pub text: Option<String>,
    pub html: Option<String>,
    pub snippet: String,
    pub attachments: Vec<ExtractedAttachment>,
}

/// Parses a raw header block (or a whole message; parsing stops at the
/// first blank line).
pub fn parse_headers(raw: &[u8]) -> Result<MessageHeaders> {
    let (headers, _) = mailparse::parse_headers(raw)?;
    Ok(headers_from(&headers))
}

fn headers_from(headers: &[MailHeader<'_>]) -> MessageHeaders {
    let value = |name: &str| {
        headers
            .get_first_value(name)
            .map(|v| sanitize_text(v.trim()))
            .filter(|v| !v.is_empty())
    };

    let message_id = value("Message-ID")
        .and_then(|v| MessageId::parse_list(&v).into_iter().next());
    // Some clients put a chain in In-Reply-To; the last entry is the parent.
    let in_reply_to = value("In-Reply-To").and_then(|v| MessageId::parse_list(&v).pop());
    let references = value("References")
        .map(|v| MessageId::parse_list(&v))
        .unwrap_or_default();

    MessageHeaders {
        message_id,
        in_reply_to,
        references,
        from: value("From").and_then(|v| parse_address_list(&v).into_iter().next()),
        to: value("To").map(|v| parse_address_list(&v)).unwrap_or_default(),
        cc: value("Cc").map(|v| parse_address_list(&v)).unwrap_or_default(),
        reply_to: value("Reply-To").and_then(|v| parse_address_list(&v).into_iter().next()),
        subject: value("Subject"),
        date: value("Date")
            .and_then(|v| mailparse::dateparse(&v).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
    }
}

/// Parses an address header value, keeping group members.
///
/// Unparseable input is kept as a single bare address.
pub fn parse_address_list(value: &str) -> Vec<Address> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match mailparse::addrparse(trimmed) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.clone()],
                MailAddr::Group(group) => group.addrs.clone(),
            })
            .map(|info| Address {
                email: info.addr,
                name: info.display_name.filter(|n| !n.trim().is_empty()),
            })
            .collect(),
        Err(_) => vec![Address::new(trimmed)],
    }
}

/// Parses a complete RFC 5322 message.
///
/// Fails only when the top-level structure cannot be parsed at all; bad
/// parts are decoded as well as possible.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let mail = mailparse::parse_mail(raw)?;
    let headers = headers_from(&mail.headers);
    let tree = build_part(&mail);

    let mut collector = BodyCollector::default();
    tree.accept(&mut collector);

    let preview = match (&collector.text, &collector.html) {
        (Some(text), _) if !text.trim().is_empty() => snippet(text),
        (_, Some(html)) => snippet(&html_to_text(html)),
        (Some(text), None) => snippet(text),
        (None, None) => String::new(),
    };

    Ok(ParsedMessage {
        headers,
        text: collector.text,
        html: collector.html,
        snippet: preview,
        attachments: collector.attachments,
    })
}

/// Decodes readable text from a header block and the first bytes of the
/// body, as returned by a bounded `BODY[TEXT]` fetch.
///
/// With `truncated`, the last line is dropped first since it may stop in
/// the middle of an encoded run. HTML is rendered to text when there is no
/// plain part. Returns `None` when nothing readable is left.
pub fn preview_text(header: &[u8], partial: &[u8], truncated: bool) -> Option<String> {
    let body = match (truncated, partial.iter().rposition(|b| *b == b'\n')) {
        (false, _) => partial,
        (true, Some(end)) => &partial[..=end],
        (true, None) => &[][..],
    };
    let mut raw = Vec::with_capacity(header.len() + body.len());
    raw.extend_from_slice(header);
    raw.extend_from_slice(body);

    let parsed = parse_message(&raw).ok()?;
    let text = match (parsed.text, parsed.html) {
        (Some(text), _) if !text.trim().is_empty() => text,
        (_, Some(html)) => html_to_text(&html),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Lists the attachments advertised by a structure-only tree.
pub fn attachments_from_structure(tree: &Part) -> Vec<ExtractedAttachment> {
    let mut collector = BodyCollector::default();
    tree.accept(&mut collector);
    collector.attachments
}

/// Builds the structure-only tree of a raw message: the same shape a
/// server reports in BODYSTRUCTURE, with leaf contents dropped.
pub fn parse_structure(raw: &[u8]) -> Result<Part> {
    let mail = mailparse::parse_mail(raw)?;
    let mut tree = build_part(&mail);
    strip_contents(&mut tree);
    Ok(tree)
}

fn strip_contents(part: &mut Part) {
    match part {
        Part::Leaf(leaf) => {
            leaf.body = None;
            leaf.text = None;
        }
        Part::Multipart(multi) => multi.parts.iter_mut().for_each(strip_contents),
    }
}

fn build_part(mail: &ParsedMail<'_>) -> Part {
    let mimetype = mail.ctype.mimetype.to_ascii_lowercase();
    if let Some(subtype) = mimetype.strip_prefix("multipart/") {
        return Part::Multipart(Multipart {
            subtype: subtype.to_string(),
            parts: mail.subparts.iter().map(build_part).collect(),
        });
    }

    let mut leaf = Leaf::new(mimetype);
    let charset = mail.ctype.charset.trim().to_ascii_lowercase();
    if !charset.is_empty() {
        leaf.charset = Some(charset);
    }

    let content_disposition = mail.get_content_disposition();
    if mail.headers.get_first_value("Content-Disposition").is_some() {
        leaf.disposition = match content_disposition.disposition {
            DispositionType::Attachment => Some(Disposition::Attachment),
            DispositionType::Inline => Some(Disposition::Inline),
            _ => None,
        };
    }
    leaf.filename = content_disposition
        .params
        .get("filename")
        .or_else(|| mail.ctype.params.get("name"))
        .map(|name| sanitize_text(name.trim()))
        .filter(|name| !name.is_empty());
    leaf.content_id = mail
        .headers
        .get_first_value("Content-ID")
        .and_then(|cid| normalize_content_id(&cid));

    let body = decode_transfer(mail);
    if leaf.content_type.starts_with("text/") {
        // Charset conversion only succeeds on the mailparse path.
        leaf.text = Some(match mail.get_body() {
            Ok(text) => sanitize_text(&text),
            Err(_) => sanitize_bytes(&body),
        });
    }
    leaf.size = body.len() as u64;
    leaf.body = Some(body);
    Part::Leaf(leaf)
}

fn decode_transfer(mail: &ParsedMail<'_>) -> Vec<u8> {
    match mail.get_body_encoded() {
        Body::Base64(encoded) => {
            let outcome = decode_base64(encoded.get_raw());
            match &outcome {
                Base64Outcome::Clean(_) => {}
                Base64Outcome::Repaired(_) => {
                    debug!(content_type = %mail.ctype.mimetype, "repaired malformed base64 part");
                }
                Base64Outcome::Raw(_) => {
                    debug!(content_type = %mail.ctype.mimetype, "keeping undecodable base64 part raw");
                }
            }
            outcome.into_bytes()
        }
        Body::QuotedPrintable(encoded) => encoded
            .get_decoded()
            .unwrap_or_else(|_| encoded.get_raw().to_vec()),
        Body::SevenBit(text) | Body::EightBit(text) => text.get_raw().to_vec(),
        Body::Binary(binary) => binary.get_raw().to_vec(),
    }
}

/// Picks the text and HTML bodies and collects deduplicated attachments.
#[derive(Default)]
struct BodyCollector {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<ExtractedAttachment>,
    seen: HashSet<(String, u64, String)>,
}

impl BodyCollector {
    fn leaf_text(leaf: &Leaf) -> Option<String> {
        leaf.text
            .clone()
            .or_else(|| leaf.body.as_deref().map(sanitize_bytes))
    }

    fn push_attachment(&mut self, leaf: &Leaf) {
        let filename = leaf
            .filename
            .clone()
            .unwrap_or_else(|| generated_filename(&leaf.content_type));
        let size = leaf
            .body
            .as_ref()
            .map(|b| b.len() as u64)
            .unwrap_or(leaf.size);
        let prefix = leaf.body.as_deref().map(prefix_hash).unwrap_or_default();

        if !self.seen.insert((filename.clone(), size, prefix)) {
            debug!(%filename, size, "skipping duplicate attachment");
            return;
        }

        let is_inline = match leaf.disposition {
            Some(Disposition::Inline) => true,
            Some(Disposition::Attachment) => false,
            None => leaf.content_id.is_some(),
        };

        self.attachments.push(ExtractedAttachment {
            filename,
            content_type: leaf.content_type.clone(),
            content_id: leaf.content_id.clone(),
            is_inline,
            size,
            data: leaf.body.clone(),
        });
    }
}

impl PartVisitor for BodyCollector {
    fn visit_leaf(&mut self, leaf: &Leaf) {
        let taken = match leaf.content_type.as_str() {
            "text/plain" => self.text.is_some(),
            "text/html" => self.html.is_some(),
            _ => false,
        };
        match leaf.role(taken) {
            LeafRole::Text => self.text = Self::leaf_text(leaf),
            LeafRole::Html => self.html = Self::leaf_text(leaf),
            LeafRole::Attachment => self.push_attachment(leaf),
            LeafRole::Ignored => {}
        }
    }
}
