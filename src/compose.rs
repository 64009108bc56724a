//! Outgoing message composition
//!
//! Builds send, reply and forward requests and hands the finished message
//! to a [`DeliveryTransport`]. Reply and forward start from an existing
//! [`MessageRecord`] loaded through the mailbox session.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;

use crate::config::Account;
use crate::errors::{AppError, AppResult};
use crate::fetch;
use crate::mailbox::MailboxClient;
use crate::models::{Attachment, BodyType, MessageRecord};

/// Fields of a message to send
#[derive(Debug, Clone, Default)]
pub struct ComposeRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub body_type: BodyType,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub from_name: Option<String>,
}

/// Body of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingBody {
    Text(String),
    Html(String),
}

/// Decoded attachment ready for encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

/// Validated message handed to the transport
///
/// Address lists are already joined with `", "`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub body: OutgoingBody,
    pub attachments: Vec<OutgoingAttachment>,
}

/// Result of a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub success: bool,
}

/// Mail submission client
pub trait DeliveryTransport {
    /// Submit `message` as `account`; returns the assigned Message-ID
    async fn deliver(&self, account: &Account, message: OutgoingMessage) -> AppResult<String>;
}

/// Reply settings supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ReplyOptions {
    pub body: String,
    pub body_type: BodyType,
    pub reply_all: bool,
    pub include_original: bool,
    pub include_attachments: bool,
    pub additional_attachments: Vec<Attachment>,
    /// Replaces the derived recipients when non-empty
    pub to: Vec<String>,
}

/// Forward settings supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ForwardOptions {
    pub to: Vec<String>,
    pub body: String,
    pub body_type: BodyType,
    pub include_original: bool,
    pub include_attachments: bool,
    pub additional_attachments: Vec<Attachment>,
}

/// Validate, encode and deliver a message
///
/// # Errors
///
/// - `Validation` for empty recipients, subject or body, or bad base64
/// - `Delivery` if the transport rejects the message
pub async fn send<T: DeliveryTransport>(
    transport: &T,
    account: &Account,
    request: ComposeRequest,
) -> AppResult<SendReceipt> {
    let message = build_outgoing(account, request)?;
    let message_id = transport.deliver(account, message).await?;
    tracing::info!(account = %account.name, %message_id, "message delivered");
    Ok(SendReceipt {
        success: !message_id.is_empty(),
        message_id,
    })
}

fn build_outgoing(account: &Account, request: ComposeRequest) -> AppResult<OutgoingMessage> {
    let to = non_blank(request.to);
    if to.is_empty() {
        return Err(AppError::invalid("to is required and must not be empty"));
    }
    if request.subject.trim().is_empty() {
        return Err(AppError::invalid("subject is required"));
    }
    if request.body.trim().is_empty() {
        return Err(AppError::invalid("body is required"));
    }

    let from = match request.from_name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => format!("\"{}\" <{}>", name.replace('"', ""), account.smtp_user),
        None => account.smtp_user.clone(),
    };
    let attachments = request
        .attachments
        .into_iter()
        .map(decode_attachment)
        .collect::<AppResult<Vec<_>>>()?;
    let body = match request.body_type {
        BodyType::Plain => OutgoingBody::Text(request.body),
        BodyType::Html => OutgoingBody::Html(request.body),
    };

    Ok(OutgoingMessage {
        from,
        to: to.join(", "),
        cc: join_optional(request.cc),
        bcc: join_optional(request.bcc),
        subject: request.subject,
        body,
        attachments,
    })
}

fn decode_attachment(attachment: Attachment) -> AppResult<OutgoingAttachment> {
    let content = STANDARD
        .decode(attachment.content.trim())
        .map_err(|e| {
            AppError::invalid(format!(
                "attachment '{}' is not valid base64: {e}",
                attachment.filename
            ))
        })?;
    Ok(OutgoingAttachment {
        filename: attachment.filename,
        content,
        content_type: attachment.content_type,
    })
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect()
}

fn join_optional(values: Vec<String>) -> Option<String> {
    let values = non_blank(values);
    (!values.is_empty()).then(|| values.join(", "))
}

/// Load the message being replied to or forwarded
///
/// # Errors
///
/// - `NotFound` if no message has this id in `folder`
pub async fn load_original<C: MailboxClient>(
    client: &mut C,
    folder: &str,
    id: &str,
    include_attachments: bool,
) -> AppResult<MessageRecord> {
    fetch::fetch_by_id(client, folder, id, include_attachments)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Email with ID {id} not found")))
}

/// Derive a reply from `original`
pub fn build_reply(
    account: &Account,
    original: &MessageRecord,
    options: ReplyOptions,
) -> AppResult<ComposeRequest> {
    let to = if non_blank(options.to.clone()).is_empty() {
        reply_recipients(account, original, options.reply_all)?
    } else {
        non_blank(options.to)
    };
    let body = with_quote(
        options.body,
        original,
        options.include_original,
        options.body_type,
        "Original Message:",
    );

    Ok(ComposeRequest {
        to,
        subject: reply_subject(&original.subject),
        body,
        body_type: options.body_type,
        attachments: merge_attachments(
            options.additional_attachments,
            original,
            options.include_attachments,
        ),
        from_name: account.default_from_name.clone(),
        ..ComposeRequest::default()
    })
}

/// Derive a forward from `original`
///
/// # Errors
///
/// - `Validation` if no recipient is given
pub fn build_forward(
    account: &Account,
    original: &MessageRecord,
    options: ForwardOptions,
) -> AppResult<ComposeRequest> {
    let to = non_blank(options.to);
    if to.is_empty() {
        return Err(AppError::invalid("to is required for forward"));
    }
    let body = with_quote(
        options.body,
        original,
        options.include_original,
        options.body_type,
        "Forwarded Message:",
    );

    Ok(ComposeRequest {
        to,
        subject: forward_subject(&original.subject),
        body,
        body_type: options.body_type,
        attachments: merge_attachments(
            options.additional_attachments,
            original,
            options.include_attachments,
        ),
        from_name: account.default_from_name.clone(),
        ..ComposeRequest::default()
    })
}

/// Original sender, then (for reply-all) every other recipient except our
/// own address, without duplicates
fn reply_recipients(
    account: &Account,
    original: &MessageRecord,
    reply_all: bool,
) -> AppResult<Vec<String>> {
    let pattern = address_pattern()?;
    let mut to = vec![extract_address(&pattern, &original.from)];
    if reply_all {
        for addr in &original.to {
            let email = extract_address(&pattern, addr);
            let is_self = email.eq_ignore_ascii_case(&account.smtp_user);
            let is_dup = to.iter().any(|t| t.eq_ignore_ascii_case(&email));
            if !is_self && !is_dup && !email.is_empty() {
                to.push(email);
            }
        }
    }
    Ok(to)
}

fn address_pattern() -> AppResult<Regex> {
    Regex::new(r"<(.+?)>").map_err(|e| AppError::Internal(format!("invalid address regex: {e}")))
}

/// Bracketed address if present, otherwise the trimmed input
fn extract_address(pattern: &Regex, input: &str) -> String {
    pattern
        .captures(input)
        .and_then(|c| c.get(1))
        .map_or_else(|| input.trim().to_owned(), |m| m.as_str().to_owned())
}

pub fn reply_subject(subject: &str) -> String {
    if subject.starts_with("Re:") {
        subject.to_owned()
    } else {
        format!("Re: {subject}")
    }
}

pub fn forward_subject(subject: &str) -> String {
    if subject.starts_with("Fwd:") {
        subject.to_owned()
    } else {
        format!("Fwd: {subject}")
    }
}

fn with_quote(
    mut body: String,
    original: &MessageRecord,
    include_original: bool,
    body_type: BodyType,
    label: &str,
) -> String {
    let Some(quoted) = original.body.as_deref().filter(|b| !b.is_empty()) else {
        return body;
    };
    if !include_original {
        return body;
    }
    match body_type {
        BodyType::Html => {
            body.push_str(&format!("<br><br>---<br><strong>{label}</strong><br>{quoted}"));
        }
        BodyType::Plain => body.push_str(&format!("\n\n---\n{label}\n{quoted}")),
    }
    body
}

/// Caller-supplied attachments first, then the original's
fn merge_attachments(
    mut additional: Vec<Attachment>,
    original: &MessageRecord,
    include_original: bool,
) -> Vec<Attachment> {
    if include_original && let Some(carried) = &original.attachments {
        additional.extend(carried.iter().cloned());
    }
    additional
}


#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::{
        ComposeRequest, ForwardOptions, OutgoingBody, ReplyOptions, build_forward, build_reply,
        forward_subject, load_original, reply_subject, send,
    };
    use crate::config::test_account;
    use crate::errors::AppError;
    use crate::mailbox::fake::{FakeMailbox, FakeMessage, raw_message};
    use crate::models::{Attachment, BodyType, MessageRecord};

    fn original() -> MessageRecord {
        MessageRecord {
            id: "42".to_owned(),
            subject: "Hello".to_owned(),
            from: "Alice <alice@example.com>".to_owned(),
            to: vec![
                "Me <ME@example.com>".to_owned(),
                "Bob <bob@example.com>".to_owned(),
                "<alice@example.com>".to_owned(),
                "carol@example.com".to_owned(),
            ],
            date: "2025-01-01T00:00:00.000Z".to_owned(),
            snippet: Some("hi".to_owned()),
            body: Some("<p>hi</p>".to_owned()),
            is_unread: false,
            is_flagged: false,
            has_attachments: true,
            attachments: Some(vec![Attachment {
                filename: "orig.txt".to_owned(),
                content: "b3JpZw==".to_owned(),
                content_type: Some("text/plain".to_owned()),
            }]),
        }
    }

    fn extra() -> Attachment {
        Attachment {
            filename: "extra.txt".to_owned(),
            content: "ZXh0cmE=".to_owned(),
            content_type: None,
        }
    }

    #[test]
    fn subject_prefixes_are_not_doubled() {
        assert_eq!(reply_subject("Re: Hello"), "Re: Hello");
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "Re: RE: Hello");
        assert_eq!(forward_subject("Fwd: Hello"), "Fwd: Hello");
        assert_eq!(forward_subject("Hello"), "Fwd: Hello");
    }

    #[test]
    fn reply_goes_to_sender_only() {
        let account = test_account("work", "me@example.com");
        let reply = build_reply(
            &account,
            &original(),
            ReplyOptions {
                body: "thanks".to_owned(),
                ..ReplyOptions::default()
            },
        )
        .expect("reply");
        assert_eq!(reply.to, vec!["alice@example.com".to_owned()]);
        assert_eq!(reply.subject, "Re: Hello");
        assert_eq!(reply.body, "thanks");
        assert!(reply.attachments.is_empty());
    }

    #[test]
    fn reply_all_excludes_own_address_and_duplicates() {
        let account = test_account("work", "me@example.com");
        let reply = build_reply(
            &account,
            &original(),
            ReplyOptions {
                body: "thanks".to_owned(),
                reply_all: true,
                ..ReplyOptions::default()
            },
        )
        .expect("reply");
        assert_eq!(
            reply.to,
            vec![
                "alice@example.com".to_owned(),
                "bob@example.com".to_owned(),
                "carol@example.com".to_owned()
            ]
        );
    }

    #[test]
    fn explicit_to_overrides_derived_recipients() {
        let account = test_account("work", "me@example.com");
        let reply = build_reply(
            &account,
            &original(),
            ReplyOptions {
                body: "thanks".to_owned(),
                reply_all: true,
                to: vec!["dave@example.com".to_owned()],
                ..ReplyOptions::default()
            },
        )
        .expect("reply");
        assert_eq!(reply.to, vec!["dave@example.com".to_owned()]);
    }

    #[test]
    fn quoting_follows_body_type() {
        let account = test_account("work", "me@example.com");
        let html = build_reply(
            &account,
            &original(),
            ReplyOptions {
                body: "ok".to_owned(),
                body_type: BodyType::Html,
                include_original: true,
                ..ReplyOptions::default()
            },
        )
        .expect("reply");
        assert_eq!(
            html.body,
            "ok<br><br>---<br><strong>Original Message:</strong><br><p>hi</p>"
        );

        let plain = build_forward(
            &account,
            &original(),
            ForwardOptions {
                to: vec!["x@example.com".to_owned()],
                body: "fyi".to_owned(),
                body_type: BodyType::Plain,
                include_original: true,
                ..ForwardOptions::default()
            },
        )
        .expect("forward");
        assert_eq!(plain.body, "fyi\n\n---\nForwarded Message:\n<p>hi</p>");
        assert_eq!(plain.subject, "Fwd: Hello");
    }

    #[test]
    fn attachments_merge_additional_first() {
        let account = test_account("work", "me@example.com");
        let fwd = build_forward(
            &account,
            &original(),
            ForwardOptions {
                to: vec!["x@example.com".to_owned()],
                body: "fyi".to_owned(),
                include_attachments: true,
                additional_attachments: vec![extra()],
                ..ForwardOptions::default()
            },
        )
        .expect("forward");
        let names = fwd
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["extra.txt", "orig.txt"]);
    }

    #[test]
    fn forward_requires_recipient() {
        let account = test_account("work", "me@example.com");
        let err = build_forward(
            &account,
            &original(),
            ForwardOptions {
                to: vec!["  ".to_owned()],
                body: "fyi".to_owned(),
                ..ForwardOptions::default()
            },
        )
        .expect_err("no recipient");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn send_builds_from_header_and_decodes_attachments() {
        let mut account = test_account("work", "me@example.com");
        account.default_from_name = Some("Me Myself".to_owned());
        let transport = FakeTransport::default();
        let receipt = send(
            &transport,
            &account,
            ComposeRequest {
                to: vec!["a@example.com".to_owned(), "b@example.com".to_owned()],
                subject: "Status".to_owned(),
                body: "all good".to_owned(),
                body_type: BodyType::Plain,
                cc: vec!["c@example.com".to_owned()],
                attachments: vec![extra()],
                from_name: account.default_from_name.clone(),
                ..ComposeRequest::default()
            },
        )
        .await
        .expect("send");
        assert!(receipt.success);
        assert_eq!(receipt.message_id, "<1@test.local>");

        let sent = transport.sent.lock().expect("lock");
        let msg = &sent[0];
        assert_eq!(msg.from, "\"Me Myself\" <me@example.com>");
        assert_eq!(msg.to, "a@example.com, b@example.com");
        assert_eq!(msg.cc.as_deref(), Some("c@example.com"));
        assert!(msg.bcc.is_none());
        assert_eq!(msg.body, OutgoingBody::Text("all good".to_owned()));
        assert_eq!(msg.attachments[0].content, b"extra".to_vec());
    }

    #[tokio::test]
    async fn send_validates_fields_and_base64() {
        let account = test_account("work", "me@example.com");
        let transport = FakeTransport::default();
        let base = ComposeRequest {
            to: vec!["a@example.com".to_owned()],
            subject: "s".to_owned(),
            body: "b".to_owned(),
            ..ComposeRequest::default()
        };

        for bad in [
            ComposeRequest {
                to: Vec::new(),
                ..base.clone()
            },
            ComposeRequest {
                subject: " ".to_owned(),
                ..base.clone()
            },
            ComposeRequest {
                body: String::new(),
                ..base.clone()
            },
            ComposeRequest {
                attachments: vec![Attachment {
                    filename: "x.bin".to_owned(),
                    content: "not base64!!".to_owned(),
                    content_type: None,
                }],
                ..base.clone()
            },
        ] {
            let err = send(&transport, &account, bad).await.expect_err("invalid");
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(transport.sent.lock().expect("lock").is_empty());

        let ok = send(&transport, &account, base).await.expect("valid");
        assert!(ok.success);
        let sent = transport.sent.lock().expect("lock");
        assert_eq!(sent[0].from, "me@example.com");
        assert_eq!(sent[0].body, OutgoingBody::Html("b".to_owned()));
    }

    #[tokio::test]
    async fn transport_rejection_surfaces() {
        let account = test_account("work", "me@example.com");
        let transport = FakeTransport {
            reject: true,
            ..FakeTransport::default()
        };
        let err = send(
            &transport,
            &account,
            ComposeRequest {
                to: vec!["a@example.com".to_owned()],
                subject: "s".to_owned(),
                body: "b".to_owned(),
                ..ComposeRequest::default()
            },
        )
        .await
        .expect_err("rejected");
        assert!(matches!(err, AppError::Delivery(_)));
    }

    #[tokio::test]
    async fn missing_original_is_not_found() {
        let mut client = FakeMailbox::with_messages(vec![FakeMessage::new(
            1,
            raw_message("a@example.com", "me@example.com", "Hi", "Wed, 1 Jan 2025 00:00:00 +0000", "x"),
        )]);
        let err = load_original(&mut client, "INBOX", "77", false)
            .await
            .expect_err("absent");
        match err {
            AppError::NotFound(msg) => assert_eq!(msg, "Email with ID 77 not found"),
            other => panic!("expected not found, got {other:?}"),
        }
        let found = load_original(&mut client, "INBOX", "1", false)
            .await
            .expect("present");
        assert_eq!(found.subject, "Hi");
    }
}
