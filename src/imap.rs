//! IMAP transport and session operations
//!
//! Opens one authenticated `async-imap` session per tool call and implements
//! [`MailboxClient`] on top of it. Every network call is wrapped in a
//! timeout derived from server config.

use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_imap::imap_proto::BodyStructure;
use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{Account, ServerConfig};
use crate::errors::{AppError, AppResult, ConnectionError, Endpoint};
use crate::mailbox::{FetchedRecord, FolderEntry, MailboxClient, RecordContent};

/// Header fields needed to build a message record
const SUMMARY_QUERY: &str =
    "(UID FLAGS BODYSTRUCTURE BODY.PEEK[HEADER.FIELDS (DATE FROM TO SUBJECT)])";
/// Full source without setting `\Seen`
const SOURCE_QUERY: &str = "(UID FLAGS BODYSTRUCTURE BODY.PEEK[])";

/// Socket under an IMAP session: implicit TLS or plaintext
#[derive(Debug)]
pub enum MailStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Type alias for an authenticated IMAP session
pub type ImapSession = Session<MailStream>;

/// Authenticated IMAP session with its per-command timeout
pub struct ImapClient {
    session: ImapSession,
    socket_timeout: Duration,
    /// Cached `MOVE` capability, probed on first move
    supports_move: Option<bool>,
}

/// Connect to the IMAP server and authenticate
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect (`connect_timeout_ms`)
/// 2. TLS handshake when `imap_secure` (`greeting_timeout_ms`)
/// 3. Read IMAP greeting (`greeting_timeout_ms`)
/// 4. LOGIN with the account's SMTP credentials (`greeting_timeout_ms`)
///
/// # Errors
///
/// - `Config` if the account lacks `imap_host`, `smtp_user` or `smtp_pass`
/// - `Connection` classified as refused, timeout, TLS, auth or protocol
pub async fn connect_authenticated(config: &ServerConfig, account: &Account) -> AppResult<ImapClient> {
    account.ensure_session_ready()?;
    let endpoint = Endpoint {
        host: account.imap_host.as_str(),
        port: account.imap_port,
        user: account.smtp_user.as_str(),
    };
    let greeting_duration = config.greeting_timeout();

    let tcp = timeout(
        config.connect_timeout(),
        TcpStream::connect((account.imap_host.as_str(), account.imap_port)),
    )
    .await
    .map_err(|_| endpoint.timed_out("tcp connect timeout"))?
    .map_err(|e| tcp_failure(&endpoint, &e))?;

    let stream = if account.imap_secure {
        MailStream::Tls(Box::new(
            tls_handshake(&endpoint, tcp, greeting_duration).await?,
        ))
    } else {
        tracing::warn!(
            account = %account.name,
            host = %account.imap_host,
            "opening plaintext IMAP session"
        );
        MailStream::Plain(tcp)
    };

    let mut client = Client::new(stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| endpoint.timed_out("IMAP greeting timeout"))?
        .map_err(|e| endpoint.classify(format!("IMAP greeting failed: {e}")))?;
    if greeting.is_none() {
        return Err(endpoint
            .protocol("server closed connection before greeting")
            .into());
    }

    let pass = account.smtp_pass.expose_secret();
    let session = timeout(
        greeting_duration,
        client.login(account.smtp_user.as_str(), pass),
    )
    .await
    .map_err(|_| endpoint.timed_out("IMAP login timeout"))?
    .map_err(|(e, _)| match e {
        async_imap::error::Error::No(msg) => endpoint.auth(msg),
        other => endpoint.classify(other.to_string()),
    })?;

    tracing::debug!(account = %account.name, host = %account.imap_host, "mailbox session opened");
    Ok(ImapClient {
        session,
        socket_timeout: config.socket_timeout(),
        supports_move: None,
    })
}

fn tcp_failure(endpoint: &Endpoint<'_>, error: &io::Error) -> ConnectionError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => endpoint.refused(error.to_string()),
        io::ErrorKind::TimedOut => endpoint.timed_out(error.to_string()),
        _ => endpoint.classify(format!("tcp connect failed: {error}")),
    }
}

async fn tls_handshake(
    endpoint: &Endpoint<'_>,
    tcp: TcpStream,
    limit: Duration,
) -> Result<TlsStream<TcpStream>, ConnectionError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(endpoint.host.to_owned())
        .map_err(|_| endpoint.tls("invalid IMAP host for TLS SNI"))?;
    timeout(limit, connector.connect(server_name, tcp))
        .await
        .map_err(|_| endpoint.timed_out("TLS handshake timeout"))?
        .map_err(|e| endpoint.tls(format!("TLS handshake failed: {e}")))
}

impl ImapClient {
    async fn collect_fetches(&mut self, set: String, uid: bool, query: &str) -> AppResult<Vec<Fetch>> {
        let limit = self.socket_timeout;
        let command = if uid { "UID FETCH" } else { "FETCH" };
        let fetches = if uid {
            let stream = timeout(limit, self.session.uid_fetch(set, query))
                .await
                .map_err(|_| AppError::Timeout(format!("{command} timed out")))?
                .map_err(|e| AppError::Protocol(format!("{command} failed: {e}")))?;
            timeout(limit, stream.try_collect::<Vec<_>>()).await
        } else {
            let stream = timeout(limit, self.session.fetch(set, query))
                .await
                .map_err(|_| AppError::Timeout(format!("{command} timed out")))?
                .map_err(|e| AppError::Protocol(format!("{command} failed: {e}")))?;
            timeout(limit, stream.try_collect::<Vec<_>>()).await
        };
        fetches
            .map_err(|_| AppError::Timeout(format!("{command} stream timed out")))?
            .map_err(|e| AppError::Protocol(format!("{command} stream failed: {e}")))
    }

    async fn store(&mut self, uid: u32, query: String) -> AppResult<()> {
        let limit = self.socket_timeout;
        let stream = timeout(limit, self.session.uid_store(uid.to_string(), query))
            .await
            .map_err(|_| AppError::Timeout("UID STORE timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("uid store failed: {e}")))?;
        let _: Vec<Fetch> = timeout(limit, stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("UID STORE stream timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("uid store stream failed: {e}")))?;
        Ok(())
    }

    async fn has_move(&mut self) -> AppResult<bool> {
        if let Some(known) = self.supports_move {
            return Ok(known);
        }
        let caps = timeout(self.socket_timeout, self.session.capabilities())
            .await
            .map_err(|_| AppError::Timeout("CAPABILITY timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("CAPABILITY failed: {e}")))?;
        let supported = caps.has_str("MOVE");
        self.supports_move = Some(supported);
        Ok(supported)
    }
}

impl MailboxClient for ImapClient {
    async fn select(&mut self, mailbox: &str) -> AppResult<u32> {
        let selected = timeout(self.socket_timeout, self.session.select(mailbox))
            .await
            .map_err(|_| AppError::Timeout(format!("SELECT timed out for mailbox '{mailbox}'")))?
            .map_err(|e| AppError::NotFound(format!("cannot select mailbox '{mailbox}': {e}")))?;
        Ok(selected.exists)
    }

    async fn examine(&mut self, mailbox: &str) -> AppResult<u32> {
        let examined = timeout(self.socket_timeout, self.session.examine(mailbox))
            .await
            .map_err(|_| AppError::Timeout(format!("EXAMINE timed out for mailbox '{mailbox}'")))?
            .map_err(|e| AppError::NotFound(format!("cannot examine mailbox '{mailbox}': {e}")))?;
        Ok(examined.exists)
    }

    async fn fetch_sequence(
        &mut self,
        first: u32,
        last: u32,
        with_source: bool,
    ) -> AppResult<Vec<FetchedRecord>> {
        let fetches = self
            .collect_fetches(format!("{first}:{last}"), false, query_for(with_source))
            .await?;
        Ok(fetches
            .iter()
            .filter_map(|f| to_record(f, with_source))
            .collect())
    }

    async fn search(&mut self, query: &str) -> AppResult<Vec<u32>> {
        let set: HashSet<u32> = timeout(self.socket_timeout, self.session.uid_search(query))
            .await
            .map_err(|_| AppError::Timeout("UID SEARCH timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("uid search failed: {e}")))?;
        let mut uids: Vec<u32> = set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_uids(
        &mut self,
        uids: &[u32],
        with_source: bool,
    ) -> AppResult<Vec<FetchedRecord>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let fetches = self
            .collect_fetches(set, true, query_for(with_source))
            .await?;
        let mut records = fetches
            .iter()
            .filter_map(|f| to_record(f, with_source))
            .collect::<Vec<_>>();
        records.sort_by_key(|r| uids.iter().position(|u| *u == r.uid));
        Ok(records)
    }

    async fn add_flag(&mut self, uid: u32, flag: &str) -> AppResult<()> {
        self.store(uid, format!("+FLAGS.SILENT ({flag})")).await
    }

    async fn remove_flag(&mut self, uid: u32, flag: &str) -> AppResult<()> {
        self.store(uid, format!("-FLAGS.SILENT ({flag})")).await
    }

    /// Prefers `UID MOVE` (RFC 6851), falling back to copy, `\Deleted` and expunge
    async fn move_message(&mut self, uid: u32, mailbox: &str) -> AppResult<()> {
        let limit = self.socket_timeout;
        if self.has_move().await? {
            return timeout(limit, self.session.uid_mv(uid.to_string(), mailbox))
                .await
                .map_err(|_| AppError::Timeout("UID MOVE timed out".to_owned()))?
                .map_err(|e| AppError::Protocol(format!("UID MOVE failed: {e}")));
        }

        timeout(limit, self.session.uid_copy(uid.to_string(), mailbox))
            .await
            .map_err(|_| AppError::Timeout("UID COPY timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("UID COPY failed: {e}")))?;
        self.store(uid, "+FLAGS.SILENT (\\Deleted)".to_owned())
            .await?;
        let stream = timeout(limit, self.session.uid_expunge(uid.to_string()))
            .await
            .map_err(|_| AppError::Timeout("UID EXPUNGE timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("UID EXPUNGE failed: {e}")))?;
        let _: Vec<u32> = timeout(limit, stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("UID EXPUNGE stream timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("UID EXPUNGE stream failed: {e}")))?;
        Ok(())
    }

    async fn list_folders(&mut self) -> AppResult<Vec<FolderEntry>> {
        let limit = self.socket_timeout;
        let stream = timeout(limit, self.session.list(None, Some("*")))
            .await
            .map_err(|_| AppError::Timeout("LIST timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("LIST failed: {e}")))?;
        let names = timeout(limit, stream.try_collect::<Vec<_>>())
            .await
            .map_err(|_| AppError::Timeout("LIST stream timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("LIST stream failed: {e}")))?;
        Ok(names
            .iter()
            .map(|name| FolderEntry {
                path: name.name().to_owned(),
                delimiter: name.delimiter().map(|d| d.to_string()),
            })
            .collect())
    }

    async fn logout(&mut self) -> AppResult<()> {
        timeout(self.socket_timeout, self.session.logout())
            .await
            .map_err(|_| AppError::Timeout("LOGOUT timed out".to_owned()))?
            .map_err(|e| AppError::Protocol(format!("LOGOUT failed: {e}")))
    }
}

fn query_for(with_source: bool) -> &'static str {
    if with_source {
        SOURCE_QUERY
    } else {
        SUMMARY_QUERY
    }
}

/// Convert one FETCH response into a record; responses without a UID are
/// unsolicited flag updates and are skipped
fn to_record(fetch: &Fetch, with_source: bool) -> Option<FetchedRecord> {
    let uid = fetch.uid?;
    let content = if with_source {
        RecordContent::Source(fetch.body()?.to_vec())
    } else {
        RecordContent::Headers(fetch.header().or_else(|| fetch.body())?.to_vec())
    };
    let mut seen = false;
    let mut flagged = false;
    for flag in fetch.flags() {
        match flag {
            Flag::Seen => seen = true,
            Flag::Flagged => flagged = true,
            _ => {}
        }
    }
    Some(FetchedRecord {
        uid,
        seen,
        flagged,
        has_attachments: fetch.bodystructure().is_some_and(has_attachment_part),
        content,
    })
}

/// True if any descendant part carries an attachment disposition
fn has_attachment_part(structure: &BodyStructure<'_>) -> bool {
    match structure {
        BodyStructure::Multipart { bodies, .. } => bodies
            .iter()
            .any(|part| is_attachment(part) || has_attachment_part(part)),
        _ => false,
    }
}

fn is_attachment(structure: &BodyStructure<'_>) -> bool {
    let common = match structure {
        BodyStructure::Basic { common, .. }
        | BodyStructure::Text { common, .. }
        | BodyStructure::Message { common, .. }
        | BodyStructure::Multipart { common, .. } => common,
    };
    common
        .disposition
        .as_ref()
        .is_some_and(|d| d.ty.eq_ignore_ascii_case("attachment"))
}
