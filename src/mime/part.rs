//! MIME part tree.
//!
//! The same tree is built from a full message (leaves carry decoded bytes)
//! and from an IMAP BODYSTRUCTURE response (leaves carry no bytes), so body
//! selection and attachment detection share one code path.

/// A node of a message's MIME structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A single content part.
    Leaf(Leaf),
    /// A `multipart/*` container.
    Multipart(Multipart),
}

/// Content disposition of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

/// A content part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Leaf {
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// Declared charset, lowercase.
    pub charset: Option<String>,
    /// Declared disposition.
    pub disposition: Option<Disposition>,
    /// Filename from the disposition or content-type parameters.
    pub filename: Option<String>,
    /// Content-ID without angle brackets.
    pub content_id: Option<String>,
    /// Size in bytes: decoded length when `body` is set, otherwise the
    /// encoded size advertised by the server.
    pub size: u64,
    /// Decoded content, absent for structure-only trees.
    pub body: Option<Vec<u8>>,
    /// Decoded text for `text/*` leaves, already charset-converted.
    pub text: Option<String>,
}

/// A `multipart/*` container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Multipart {
    /// Lowercase subtype (`mixed`, `alternative`, `related`, ...).
    pub subtype: String,
    /// Child parts in order.
    pub parts: Vec<Part>,
}

/// What a leaf contributes to the decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafRole {
    /// Candidate plain-text body.
    Text,
    /// Candidate HTML body.
    Html,
    /// Attachment record.
    Attachment,
    /// Neither body nor attachment (e.g. tracking pixels, stray text).
    Ignored,
}

impl Leaf {
    /// Creates a leaf of the given content type.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into().to_ascii_lowercase(),
            ..Self::default()
        }
    }

    fn is_text_body_type(&self) -> bool {
        self.content_type == "text/plain" || self.content_type == "text/html"
    }

    /// Classifies the leaf.
    ///
    /// `body_taken` reports whether a body of the same kind was already
    /// found, since the first text or HTML part wins.
    pub fn role(&self, body_taken: bool) -> LeafRole {
        let explicit_attachment = self.disposition == Some(Disposition::Attachment);

        if self.is_text_body_type() && !explicit_attachment && !body_taken {
            return if self.content_type == "text/html" {
                LeafRole::Html
            } else {
                LeafRole::Text
            };
        }

        if self.disposition.is_some() && self.filename.is_some() {
            return LeafRole::Attachment;
        }
        if self.disposition == Some(Disposition::Inline) && self.content_id.is_some() {
            return LeafRole::Attachment;
        }
        if explicit_attachment {
            return LeafRole::Attachment;
        }
        if is_binary_type(&self.content_type) {
            // A bare inline part with neither name nor id is a tracking
            // pixel or similar decoration.
            if self.disposition == Some(Disposition::Inline)
                && self.filename.is_none()
                && self.content_id.is_none()
            {
                return LeafRole::Ignored;
            }
            return LeafRole::Attachment;
        }
        if self.content_type.starts_with("text/") && self.filename.is_some() {
            return LeafRole::Attachment;
        }
        LeafRole::Ignored
    }
}

/// Returns true for media types that are never rendered as body text.
pub fn is_binary_type(content_type: &str) -> bool {
    let major = content_type.split('/').next().unwrap_or_default();
    matches!(
        major,
        "image" | "audio" | "video" | "application" | "font" | "model" | "message"
    )
}

/// Visitor over a [`Part`] tree.
pub trait PartVisitor {
    /// Called for every leaf, depth first, in document order.
    fn visit_leaf(&mut self, leaf: &Leaf);

    /// Called before the children of a multipart.
    fn enter_multipart(&mut self, _multipart: &Multipart) {}

    /// Called after the children of a multipart.
    fn leave_multipart(&mut self, _multipart: &Multipart) {}
}

impl Part {
    /// Walks the tree with `visitor`.
    pub fn accept<V: PartVisitor + ?Sized>(&self, visitor: &mut V) {
        match self {
            Part::Leaf(leaf) => visitor.visit_leaf(leaf),
            Part::Multipart(multipart) => {
                visitor.enter_multipart(multipart);
                for child in &multipart.parts {
                    child.accept(visitor);
                }
                visitor.leave_multipart(multipart);
            }
        }
    }
}
