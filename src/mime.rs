//! Message parsing and MIME handling
//!
//! Parses RFC822 headers and sources using `mailparse`, picks the display
//! body, and collects attachments as base64. HTML is sanitized with
//! `ammonia`; snippets are rendered to plain text with `html2text`.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use crate::errors::{AppError, AppResult};
use crate::models::Attachment;

/// Snippet length in characters
pub const SNIPPET_CHARS: usize = 200;

/// Summary fields read from a message header block
#[derive(Debug, Clone, Default)]
pub struct HeaderSummary {
    pub subject: Option<String>,
    /// First sender as `Display Name <address>`
    pub from: Option<String>,
    pub to: Vec<String>,
    /// Date header as a Unix timestamp
    pub date: Option<i64>,
}

/// Body and attachments extracted from a full source
#[derive(Debug, Clone, Default)]
pub struct ParsedContent {
    /// Sanitized HTML body, or the text body rendered as HTML
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Parse the summary headers
///
/// Works on either a header-only block or a full source; parsing stops
/// at the first blank line.
///
/// # Errors
///
/// - `Internal` if the header block is malformed
pub fn parse_header_summary(raw: &[u8]) -> AppResult<HeaderSummary> {
    let (headers, _) = mailparse::parse_headers(raw)
        .map_err(|e| AppError::Internal(format!("failed to parse message headers: {e}")))?;

    let subject = headers
        .get_first_value("Subject")
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty());
    let from = headers
        .get_first_header("From")
        .and_then(|h| format_addresses(h).into_iter().next());
    let to = headers
        .get_all_headers("To")
        .into_iter()
        .flat_map(format_addresses)
        .collect();
    let date = headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok());

    Ok(HeaderSummary {
        subject,
        from,
        to,
        date,
    })
}

/// Render every mailbox in an address header as `Display Name <address>`
///
/// Group syntax is flattened. Unparseable headers fall back to the raw value.
fn format_addresses(header: &mailparse::MailHeader<'_>) -> Vec<String> {
    let Ok(list) = mailparse::addrparse_header(header) else {
        let raw = header.get_value();
        let raw = raw.trim();
        return if raw.is_empty() {
            Vec::new()
        } else {
            vec![raw.to_owned()]
        };
    };
    list.iter()
        .flat_map(|addr| match addr {
            MailAddr::Single(info) => vec![info.clone()],
            MailAddr::Group(group) => group.addrs.clone(),
        })
        .map(|info| {
            format!(
                "{} <{}>",
                info.display_name.as_deref().unwrap_or(""),
                info.addr
            )
            .trim()
            .to_owned()
        })
        .collect()
}

/// Parse a full RFC822 source into a display body and attachments
///
/// # Errors
///
/// - `Internal` if `mailparse` fails or an attachment body cannot be decoded
pub fn parse_content(raw: &[u8]) -> AppResult<ParsedContent> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Internal(format!("failed to parse RFC822 message: {e}")))?;

    let mut body_text = None;
    let mut body_html = None;
    let mut attachments = Vec::new();
    walk_parts(&parsed, &mut body_text, &mut body_html, &mut attachments)?;

    let body = body_html.or_else(|| body_text.as_deref().map(text_as_html));
    Ok(ParsedContent { body, attachments })
}

/// Walk MIME part tree recursively
///
/// The first `text/plain` and `text/html` leaves that are not attachments
/// become bodies; every attachment leaf is collected in order.
fn walk_parts(
    part: &ParsedMail<'_>,
    body_text: &mut Option<String>,
    body_html: &mut Option<String>,
    attachments: &mut Vec<Attachment>,
) -> AppResult<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, body_text, body_html, attachments)?;
        }
        return Ok(());
    }

    let ctype = part.ctype.mimetype.to_ascii_lowercase();
    let disp = part.get_content_disposition();
    let filename = attachment_filename(part, &disp.params);
    let is_attachment = disp.disposition == DispositionType::Attachment || filename.is_some();

    if is_attachment {
        let raw_body = part
            .get_body_raw()
            .map_err(|e| AppError::Internal(format!("failed decoding attachment body: {e}")))?;
        attachments.push(Attachment {
            filename: filename.unwrap_or_else(|| "unnamed".to_owned()),
            content: STANDARD.encode(raw_body),
            content_type: Some(ctype),
        });
        return Ok(());
    }

    if ctype == "text/plain"
        && body_text.is_none()
        && let Ok(text) = part.get_body()
    {
        *body_text = Some(text);
    }
    if ctype == "text/html"
        && body_html.is_none()
        && let Ok(html) = part.get_body()
    {
        *body_html = Some(ammonia::clean(&html));
    }
    Ok(())
}

/// Extract attachment filename from part
///
/// Checks Content-Disposition parameter first, falls back to Content-Type
/// name parameter.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disp_params: &BTreeMap<String, String>,
) -> Option<String> {
    disp_params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
}

/// Render plain text as minimal HTML: escaped, one `<br>` per line break
pub fn text_as_html(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    let lines = escaped.replace("\r\n", "\n");
    format!("<p>{}</p>", lines.replace('\n', "<br/>"))
}

/// First [`SNIPPET_CHARS`] characters of the body rendered as plain text
pub fn snippet(body: &str) -> String {
    let text = html2text::from_read(body.as_bytes(), 120).unwrap_or_else(|_| body.to_owned());
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(collapsed, SNIPPET_CHARS)
}

/// Truncate string to maximum characters (Unicode-aware)
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::{parse_content, parse_header_summary, snippet, text_as_html, truncate_chars};

    #[test]
    fn truncates_unicode_by_character() {
        let out = truncate_chars("añbñc".to_owned(), 4);
        assert_eq!(out, "añbñ");
    }

    #[test]
    fn header_summary_formats_addresses() {
        let raw = b"From: \"Ada Lovelace\" <ada@example.com>\r\nTo: bob@example.com, Carol <carol@example.com>\r\nSubject: Hi\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\n";
        let summary = parse_header_summary(raw).expect("headers parse");
        assert_eq!(summary.subject.as_deref(), Some("Hi"));
        assert_eq!(
            summary.from.as_deref(),
            Some("Ada Lovelace <ada@example.com>")
        );
        assert_eq!(
            summary.to,
            vec![
                "<bob@example.com>".to_owned(),
                "Carol <carol@example.com>".to_owned()
            ]
        );
        assert_eq!(summary.date, Some(1_735_689_600));
    }

    #[test]
    fn missing_headers_stay_empty() {
        let summary = parse_header_summary(b"X-Other: 1\r\n\r\nbody").expect("parse");
        assert!(summary.subject.is_none());
        assert!(summary.from.is_none());
        assert!(summary.to.is_empty());
        assert!(summary.date.is_none());
    }

    #[test]
    fn plain_body_rendered_as_html() {
        let raw = b"From: a@example.com\r\nSubject: Hi\r\n\r\nline <one>\r\nline two";
        let content = parse_content(raw).expect("parse");
        assert_eq!(
            content.body.as_deref(),
            Some("<p>line &lt;one&gt;<br/>line two</p>")
        );
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn html_preferred_and_sanitized() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n\r\n",
            "--b\r\nContent-Type: text/plain\r\n\r\nplain version\r\n",
            "--b\r\nContent-Type: text/html\r\n\r\n<p>rich</p><script>alert(1)</script>\r\n",
            "--b--\r\n"
        );
        let content = parse_content(raw.as_bytes()).expect("parse");
        let body = content.body.expect("body");
        assert!(body.contains("<p>rich</p>"));
        assert!(!body.contains("script"));
    }

    #[test]
    fn attachments_are_base64_with_default_name() {
        let payload = STANDARD.encode(b"%PDF-1.4 data");
        let raw = format!(
            concat!(
                "From: a@example.com\r\n",
                "Content-Type: multipart/mixed; boundary=\"m\"\r\n\r\n",
                "--m\r\nContent-Type: text/plain\r\n\r\nsee attached\r\n",
                "--m\r\nContent-Type: application/pdf; name=\"report.pdf\"\r\n",
                "Content-Transfer-Encoding: base64\r\n\r\n{payload}\r\n",
                "--m\r\nContent-Type: application/octet-stream\r\n",
                "Content-Disposition: attachment\r\n\r\nraw\r\n",
                "--m--\r\n"
            ),
            payload = payload
        );
        let content = parse_content(raw.as_bytes()).expect("parse");
        assert_eq!(content.attachments.len(), 2);
        assert_eq!(content.attachments[0].filename, "report.pdf");
        assert_eq!(content.attachments[0].content, payload);
        assert_eq!(
            content.attachments[0].content_type.as_deref(),
            Some("application/pdf")
        );
        assert_eq!(content.attachments[1].filename, "unnamed");
        assert!(
            content
                .body
                .as_deref()
                .is_some_and(|b| b.contains("see attached"))
        );
    }

    #[test]
    fn snippet_is_plain_text_and_bounded() {
        let body = format!("<p>Hello <b>there</b></p><p>{}</p>", "word ".repeat(100));
        let out = snippet(&body);
        assert!(out.starts_with("Hello"));
        assert!(!out.contains('<'));
        assert_eq!(out.chars().count(), 200);
        assert_eq!(snippet(&text_as_html("short")), "short");
    }
}
