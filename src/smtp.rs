//! SMTP delivery via `lettre`
//!
//! `smtp_secure=true` connects with implicit TLS; otherwise the session is
//! upgraded with STARTTLS. The same user and password authenticate both the
//! mailbox session and delivery.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use crate::compose::{DeliveryTransport, OutgoingBody, OutgoingMessage};
use crate::config::Account;
use crate::errors::{AppError, AppResult};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Delivery transport backed by an SMTP relay per account
#[derive(Debug, Clone, Copy)]
pub struct SmtpDelivery {
    timeout: Duration,
}

impl SmtpDelivery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(&self, account: &Account) -> AppResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if account.smtp_secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&account.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.smtp_host)
        }
        .map_err(|e| AppError::Config(format!("invalid SMTP host '{}': {e}", account.smtp_host)))?;

        Ok(builder
            .port(account.smtp_port)
            .timeout(Some(self.timeout))
            .credentials(Credentials::new(
                account.smtp_user.clone(),
                account.smtp_pass.expose_secret().to_owned(),
            ))
            .build())
    }
}

impl DeliveryTransport for SmtpDelivery {
    async fn deliver(&self, account: &Account, message: OutgoingMessage) -> AppResult<String> {
        let email = build_message(message)?;
        let message_id = email
            .headers()
            .get_raw("Message-ID")
            .map(str::to_owned)
            .unwrap_or_default();

        let transport = self.transport(account)?;
        let response = transport
            .send(email)
            .await
            .map_err(|e| AppError::Delivery(format!("SMTP send via {} failed: {e}", account.smtp_host)))?;
        tracing::debug!(
            account = %account.name,
            code = %response.code(),
            "SMTP relay accepted message"
        );
        Ok(message_id)
    }
}

/// Encode an outgoing message as MIME
///
/// # Errors
///
/// - `Validation` for unparseable addresses or content types
/// - `Internal` if the message cannot be assembled
pub fn build_message(message: OutgoingMessage) -> AppResult<Message> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| AppError::invalid(format!("invalid from address '{}': {e}", message.from)))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(message.subject)
        .message_id(None);
    for mailbox in parse_list(&message.to, "to")? {
        builder = builder.to(mailbox);
    }
    if let Some(cc) = &message.cc {
        for mailbox in parse_list(cc, "cc")? {
            builder = builder.cc(mailbox);
        }
    }
    if let Some(bcc) = &message.bcc {
        for mailbox in parse_list(bcc, "bcc")? {
            builder = builder.bcc(mailbox);
        }
    }

    let body = match message.body {
        OutgoingBody::Text(text) => SinglePart::plain(text),
        OutgoingBody::Html(html) => SinglePart::html(html),
    };
    let built = if message.attachments.is_empty() {
        builder.singlepart(body)
    } else {
        let mut multipart = MultiPart::mixed().singlepart(body);
        for attachment in message.attachments {
            let content_type = attachment
                .content_type
                .as_deref()
                .map_or_else(|| ContentType::parse(FALLBACK_CONTENT_TYPE), ContentType::parse)
                .map_err(|e| {
                    AppError::invalid(format!(
                        "attachment '{}' has invalid content type: {e}",
                        attachment.filename
                    ))
                })?;
            multipart = multipart.singlepart(
                MimeAttachment::new(attachment.filename).body(attachment.content, content_type),
            );
        }
        builder.multipart(multipart)
    };
    built.map_err(|e| AppError::Internal(format!("failed to build email: {e}")))
}

fn parse_list(list: &str, field: &str) -> AppResult<Mailboxes> {
    list.parse::<Mailboxes>()
        .map_err(|e| AppError::invalid(format!("invalid {field} address list '{list}': {e}")))
}
