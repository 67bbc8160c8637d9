//! IMAP implementation of the wire traits.
//!
//! # Protocol Details
//!
//! - Uses IMAP4rev1 (RFC 3501) via `async-imap`
//! - Implicit TLS when the endpoint asks for it, STARTTLS otherwise
//! - Folder roles come from SPECIAL-USE attributes (RFC 6154)
//! - Metadata fetches never set `\Seen` (`BODY.PEEK`) and carry a bounded
//!   `BODY.PEEK[TEXT]<0.n>` preview

use std::borrow::Cow;
use std::sync::Arc;

use async_imap::types::{Fetch, Flag, NameAttribute};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use imap_proto::types::{BodyContentCommon, BodyContentSinglePart, BodyStructure, ContentEncoding};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

use super::{
    Credentials, FetchedMessage, MailConnector, MailSession, MailboxStatus, MessageFlags,
    ProviderError, RemoteFolder, Result, PREVIEW_BYTES,
};
use crate::domain::{FolderType, ServerEndpoint};
use crate::mime::{normalize_content_id, Disposition, Leaf, Multipart, Part};

/// Type alias for the IMAP session with TLS (using tokio-util compat layer).
type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

const BODY_QUERY: &str = "(UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[])";

/// Opens IMAP sessions over rustls.
#[derive(Clone)]
pub struct ImapConnector {
    tls: TlsConnector,
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ImapConnector {
    /// Creates a connector trusting the bundled web PKI roots.
    pub fn new() -> Self {
        let config = ClientConfig::builder()
            .with_root_certificates(RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
            .with_no_client_auth();
        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    async fn handshake(&self, host: &str, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProviderError::Tls(format!("invalid server name: {}", e)))?;
        self.tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProviderError::Tls(format!("TLS handshake failed: {}", e)))
    }

    async fn open_stream(&self, endpoint: &ServerEndpoint) -> Result<Compat<TlsStream<TcpStream>>> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| ProviderError::Connection(format!("TCP connect to {} failed: {}", addr, e)))?;

        if endpoint.use_tls {
            return Ok(self.handshake(&endpoint.host, tcp).await?.compat());
        }

        let mut client = async_imap::Client::new(tcp.compat());
        client
            .run_command_and_check_ok("STARTTLS", None)
            .await
            .map_err(|e| ProviderError::Tls(format!("STARTTLS failed: {}", e)))?;
        let tcp = client.into_inner().into_inner();
        Ok(self.handshake(&endpoint.host, tcp).await?.compat())
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailSession>> {
        let stream = self.open_stream(endpoint).await?;
        let client = async_imap::Client::new(stream);

        let session = client
            .login(&credentials.username, &credentials.password)
            .await
            .map_err(|(e, _)| ProviderError::Authentication(format!("IMAP login failed: {}", e)))?;

        info!(host = %endpoint.host, user = %credentials.username, "IMAP session opened");
        Ok(Box::new(ImapMailSession { session }))
    }
}

/// A logged-in IMAP session.
pub struct ImapMailSession {
    session: ImapSession,
}

impl ImapMailSession {
    async fn uid_fetch(&mut self, set: &str, query: &str) -> Result<Vec<FetchedMessage>> {
        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(set, query)
            .await
            .map_err(map_imap_error)?
            .try_collect()
            .await
            .map_err(map_imap_error)?;

        Ok(fetches.iter().filter_map(convert_fetch).collect())
    }
}

#[async_trait]
impl MailSession for ImapMailSession {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>> {
        let names: Vec<_> = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(map_imap_error)?
            .try_collect()
            .await
            .map_err(map_imap_error)?;

        Ok(names
            .iter()
            .map(|name| {
                let attributes = name.attributes();
                RemoteFolder {
                    name: name.name().to_string(),
                    delimiter: name.delimiter().map(str::to_string),
                    special_use: attributes.iter().find_map(special_use),
                    selectable: !attributes.iter().any(|a| matches!(a, NameAttribute::NoSelect)),
                }
            })
            .collect())
    }

    async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let selected = self.session.select(mailbox).await.map_err(|e| match e {
            async_imap::error::Error::No(msg) => {
                ProviderError::NotFound(format!("{}: {}", mailbox, msg))
            }
            other => map_imap_error(other),
        })?;

        debug!(
            mailbox,
            exists = selected.exists,
            uid_next = ?selected.uid_next,
            uid_validity = ?selected.uid_validity,
            "mailbox selected"
        );
        Ok(MailboxStatus {
            uid_validity: selected.uid_validity.unwrap_or(0),
            uid_next: selected.uid_next.unwrap_or(0),
            exists: selected.exists,
        })
    }

    async fn fetch_metadata(&mut self, from_uid: u32) -> Result<Vec<FetchedMessage>> {
        let set = format!("{}:*", from_uid.max(1));
        self.uid_fetch(&set, &metadata_query()).await
    }

    async fn fetch_bodies(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.uid_fetch(&set, BODY_QUERY).await
    }

    async fn logout(&mut self) -> Result<()> {
        self.session.logout().await.map_err(map_imap_error)
    }
}

fn metadata_query() -> String {
    format!(
        "(UID FLAGS INTERNALDATE RFC822.SIZE BODYSTRUCTURE BODY.PEEK[HEADER] BODY.PEEK[TEXT]<0.{}>)",
        PREVIEW_BYTES
    )
}

fn map_imap_error(e: async_imap::error::Error) -> ProviderError {
    match e {
        async_imap::error::Error::Io(io) => ProviderError::Connection(io.to_string()),
        async_imap::error::Error::ConnectionLost => {
            ProviderError::Connection("connection lost".to_string())
        }
        other => ProviderError::Protocol(other.to_string()),
    }
}

fn special_use(attr: &NameAttribute<'_>) -> Option<FolderType> {
    match attr {
        NameAttribute::Sent => Some(FolderType::Sent),
        NameAttribute::Drafts => Some(FolderType::Drafts),
        NameAttribute::Trash => Some(FolderType::Trash),
        NameAttribute::Junk => Some(FolderType::Spam),
        NameAttribute::Archive => Some(FolderType::Archive),
        NameAttribute::All => Some(FolderType::All),
        _ => None,
    }
}

fn convert_fetch(fetch: &Fetch) -> Option<FetchedMessage> {
    let uid = fetch.uid?;

    let mut flags = MessageFlags::default();
    for flag in fetch.flags() {
        match flag {
            Flag::Seen => flags.seen = true,
            Flag::Flagged => flags.flagged = true,
            Flag::Answered => flags.answered = true,
            Flag::Draft => flags.draft = true,
            _ => {}
        }
    }

    Some(FetchedMessage {
        uid,
        flags,
        internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
        size: fetch.size,
        header: fetch.header().map(<[u8]>::to_vec),
        structure: fetch.bodystructure().map(structure_to_part),
        preview: fetch.text().map(<[u8]>::to_vec),
        body: fetch.body().map(<[u8]>::to_vec),
    })
}

/// Converts a BODYSTRUCTURE response into a content-free part tree.
fn structure_to_part(structure: &BodyStructure<'_>) -> Part {
    match structure {
        BodyStructure::Multipart { common, bodies, .. } => Part::Multipart(Multipart {
            subtype: common.ty.subtype.to_ascii_lowercase(),
            parts: bodies.iter().map(structure_to_part).collect(),
        }),
        BodyStructure::Basic { common, other, .. }
        | BodyStructure::Text { common, other, .. }
        | BodyStructure::Message { common, other, .. } => Part::Leaf(structure_leaf(common, other)),
    }
}

type Params<'a> = Option<Vec<(Cow<'a, str>, Cow<'a, str>)>>;

fn param(params: &Params<'_>, key: &str) -> Option<String> {
    params
        .as_ref()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| decode_encoded_words(v))
        .filter(|v| !v.trim().is_empty())
}

/// Decodes RFC 2047 encoded words, which some clients put in filenames.
fn decode_encoded_words(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }
    let line = format!("X: {}", value);
    match mailparse::parse_header(line.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_string(),
    }
}

fn structure_leaf(common: &BodyContentCommon<'_>, other: &BodyContentSinglePart<'_>) -> Leaf {
    let mut leaf = Leaf::new(format!("{}/{}", common.ty.ty, common.ty.subtype));
    leaf.charset = param(&common.ty.params, "charset").map(|c| c.to_ascii_lowercase());

    if let Some(disposition) = &common.disposition {
        leaf.disposition = match disposition.ty.to_ascii_lowercase().as_str() {
            "attachment" => Some(Disposition::Attachment),
            "inline" => Some(Disposition::Inline),
            _ => None,
        };
        leaf.filename = param(&disposition.params, "filename");
    }
    if leaf.filename.is_none() {
        leaf.filename = param(&common.ty.params, "name");
    }
    leaf.content_id = other.id.as_deref().and_then(normalize_content_id);

    // Octets are the encoded size; base64 inflates by 4/3.
    let octets = u64::from(other.octets);
    leaf.size = match other.transfer_encoding {
        ContentEncoding::Base64 => octets * 3 / 4,
        _ => octets,
    };
    leaf
}

#[cfg(test)]
mod tests {
    use super::*;
    use imap_proto::types::{ContentDisposition, ContentType};

    fn common<'a>(
        ty: &'a str,
        subtype: &'a str,
        params: Params<'a>,
        disposition: Option<ContentDisposition<'a>>,
    ) -> BodyContentCommon<'a> {
        BodyContentCommon {
            ty: ContentType {
                ty: Cow::Borrowed(ty),
                subtype: Cow::Borrowed(subtype),
                params,
            },
            disposition,
            language: None,
            location: None,
        }
    }

    fn single<'a>(id: Option<&'a str>, encoding: ContentEncoding<'a>, octets: u32) -> BodyContentSinglePart<'a> {
        BodyContentSinglePart {
            id: id.map(Cow::Borrowed),
            md5: None,
            description: None,
            transfer_encoding: encoding,
            octets,
        }
    }

    #[test]
    fn converts_bodystructure_tree() {
        let structure = BodyStructure::Multipart {
            common: common("MULTIPART", "MIXED", None, None),
            bodies: vec![
                BodyStructure::Text {
                    common: common(
                        "TEXT",
                        "PLAIN",
                        Some(vec![(Cow::Borrowed("CHARSET"), Cow::Borrowed("UTF-8"))]),
                        None,
                    ),
                    other: single(None, ContentEncoding::SevenBit, 120),
                    lines: 4,
                    extension: None,
                },
                BodyStructure::Basic {
                    common: common(
                        "APPLICATION",
                        "PDF",
                        None,
                        Some(ContentDisposition {
                            ty: Cow::Borrowed("ATTACHMENT"),
                            params: Some(vec![(
                                Cow::Borrowed("FILENAME"),
                                Cow::Borrowed("=?UTF-8?Q?r=C3=A9sum=C3=A9.pdf?="),
                            )]),
                        }),
                    ),
                    other: single(Some("<cv@x>"), ContentEncoding::Base64, 4000),
                    extension: None,
                },
            ],
            extension: None,
        };

        let Part::Multipart(tree) = structure_to_part(&structure) else {
            panic!("expected multipart");
        };
        assert_eq!(tree.subtype, "mixed");

        let Part::Leaf(text) = &tree.parts[0] else {
            panic!("expected leaf");
        };
        assert_eq!(text.content_type, "text/plain");
        assert_eq!(text.charset.as_deref(), Some("utf-8"));
        assert_eq!(text.size, 120);

        let Part::Leaf(pdf) = &tree.parts[1] else {
            panic!("expected leaf");
        };
        assert_eq!(pdf.content_type, "application/pdf");
        assert_eq!(pdf.disposition, Some(Disposition::Attachment));
        assert_eq!(pdf.filename.as_deref(), Some("résumé.pdf"));
        assert_eq!(pdf.content_id.as_deref(), Some("cv@x"));
        assert_eq!(pdf.size, 3000);
        assert!(pdf.body.is_none());
    }

    #[test]
    fn metadata_query_peeks_a_bounded_preview() {
        let query = metadata_query();
        assert!(query.contains("BODY.PEEK[HEADER]"));
        assert!(query.contains("BODY.PEEK[TEXT]<0.2048>"));
        assert!(!query.contains("BODY[]"));
    }

    #[test]
    fn special_use_attributes() {
        assert_eq!(special_use(&NameAttribute::Sent), Some(FolderType::Sent));
        assert_eq!(special_use(&NameAttribute::All), Some(FolderType::All));
        assert_eq!(special_use(&NameAttribute::Archive), Some(FolderType::Archive));
        assert_eq!(special_use(&NameAttribute::Junk), Some(FolderType::Spam));
        assert_eq!(special_use(&NameAttribute::NoSelect), None);
    }
}
