//! SMTP submission via `lettre`.

use async_trait::async_trait;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Mailbox, MessageBuilder, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{Credentials, MailTransport, OutgoingEmail, ProviderError, Result};
use crate::domain::{Account, Address, MessageId, ServerEndpoint, SmtpSecurity};

/// Sends through the account's SMTP server with lettre's tokio transport.
#[derive(Debug, Clone, Default)]
pub struct SmtpMailer;

impl SmtpMailer {
    pub fn new() -> Self {
        Self
    }

    fn transport(
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let creds = SmtpCredentials::new(credentials.username.clone(), credentials.password.clone());
        let relay_error = |e: lettre::transport::smtp::Error| {
            ProviderError::Connection(format!("SMTP relay error: {}", e))
        };

        let mailer = match endpoint.smtp_security() {
            SmtpSecurity::ImplicitTls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host)
                    .map_err(relay_error)?
                    .port(endpoint.port)
                    .credentials(creds)
                    .build()
            }
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
                    .map_err(relay_error)?
                    .port(endpoint.port)
                    .credentials(creds)
                    .build()
            }
            SmtpSecurity::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&endpoint.host)
                    .port(endpoint.port)
                    .credentials(creds)
                    .build()
            }
        };
        Ok(mailer)
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(
        &self,
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
        message: Message,
    ) -> Result<()> {
        let mailer = Self::transport(endpoint, credentials)?;
        let response = mailer
            .send(message)
            .await
            .map_err(|e| ProviderError::Send(format!("SMTP send failed: {}", e)))?;

        info!(
            host = %endpoint.host,
            code = %response.code(),
            "message accepted by SMTP server"
        );
        Ok(())
    }
}

fn mailbox(addr: &Address, field: &str) -> Result<Mailbox> {
    let email = addr.email.parse().map_err(|e| {
        ProviderError::InvalidRequest(format!("invalid {} address {}: {}", field, addr.email, e))
    })?;
    Ok(Mailbox::new(addr.name.clone(), email))
}

fn angle(id: &MessageId) -> String {
    format!("<{}>", id.normalized())
}

/// Generates a Message-ID under the domain of `email`.
pub fn generate_message_id(email: &str) -> MessageId {
    let domain = email
        .rsplit_once('@')
        .map(|(_, d)| d)
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    MessageId::from(format!("{}@{}", uuid::Uuid::new_v4(), domain))
}

fn text_part(body: &str, content_type: ContentType) -> SinglePart {
    SinglePart::builder()
        .header(content_type)
        .header(ContentTransferEncoding::QuotedPrintable)
        .body(body.to_string())
}

/// Builds an RFC 5322 message for `email` sent from `account`.
///
/// The body is quoted-printable text, with an HTML alternative when one is
/// given. Attachments turn the message into `multipart/mixed` and are
/// base64 encoded.
pub fn build_message(account: &Account, email: &OutgoingEmail, message_id: &MessageId) -> Result<Message> {
    if email.to.is_empty() && email.cc.is_empty() && email.bcc.is_empty() {
        return Err(ProviderError::InvalidRequest("no recipients".to_string()));
    }

    let from = mailbox(
        &Address {
            email: account.email.clone(),
            name: account.display_name.clone(),
        },
        "from",
    )?;

    let mut builder: MessageBuilder = Message::builder()
        .from(from)
        .subject(email.subject.clone())
        .message_id(Some(angle(message_id)));

    for addr in &email.to {
        builder = builder.to(mailbox(addr, "to")?);
    }
    for addr in &email.cc {
        builder = builder.cc(mailbox(addr, "cc")?);
    }
    for addr in &email.bcc {
        builder = builder.bcc(mailbox(addr, "bcc")?);
    }

    if let Some(parent) = &email.in_reply_to {
        builder = builder.in_reply_to(angle(parent));
        let mut chain: Vec<String> = email.references.iter().map(angle).collect();
        let parent = angle(parent);
        if !chain.contains(&parent) {
            chain.push(parent);
        }
        builder = builder.references(chain.join(" "));
    } else if !email.references.is_empty() {
        let chain: Vec<String> = email.references.iter().map(angle).collect();
        builder = builder.references(chain.join(" "));
    }

    let plain = text_part(&email.body_text, ContentType::TEXT_PLAIN);
    let alternative = email.body_html.as_ref().map(|html| {
        MultiPart::alternative()
            .singlepart(plain.clone())
            .singlepart(text_part(html, ContentType::TEXT_HTML))
    });

    let built = if email.attachments.is_empty() {
        match alternative {
            Some(alt) => builder.multipart(alt),
            None => builder.singlepart(plain),
        }
    } else {
        let mut mixed = match alternative {
            Some(alt) => MultiPart::mixed().multipart(alt),
            None => MultiPart::mixed().singlepart(plain),
        };
        for attachment in &email.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .or_else(|_| ContentType::parse("application/octet-stream"))
                .map_err(|e| ProviderError::InvalidRequest(format!("bad content type: {}", e)))?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| ProviderError::InvalidRequest(format!("failed to build message: {}", e)))
}
