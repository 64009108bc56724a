//! Mailbox client seam
//!
//! The fetcher, mutation executor, and folder lister only talk to a mailbox
//! through [`MailboxClient`]. The IMAP implementation lives in
//! [`crate::imap`]; tests use the in-memory fake at the bottom of this file.

use std::time::Duration;

use tokio::time::timeout;

use crate::errors::{AppError, AppResult};

/// Upper bound on a graceful LOGOUT after the work is done
pub const LOGOUT_GRACE: Duration = Duration::from_secs(5);

/// Raw data for one message as delivered by the server
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    /// Server-assigned UID
    pub uid: u32,
    pub seen: bool,
    pub flagged: bool,
    /// Body structure reports at least one attachment-disposition part
    pub has_attachments: bool,
    pub content: RecordContent,
}

/// What was fetched for a message: only the summary headers, or the full source
#[derive(Debug, Clone)]
pub enum RecordContent {
    Headers(Vec<u8>),
    Source(Vec<u8>),
}

impl FetchedRecord {
    /// Header block bytes; for full sources the parser stops at the blank line
    pub fn header_bytes(&self) -> &[u8] {
        match &self.content {
            RecordContent::Headers(bytes) | RecordContent::Source(bytes) => bytes,
        }
    }

    pub fn source(&self) -> Option<&[u8]> {
        match &self.content {
            RecordContent::Source(bytes) => Some(bytes),
            RecordContent::Headers(_) => None,
        }
    }
}

/// A folder as reported by LIST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    /// Raw server path (modified UTF-7)
    pub path: String,
    /// Hierarchy delimiter if the server reports one
    pub delimiter: Option<String>,
}

/// Authenticated mailbox session
///
/// Every method is a single protocol round trip (or a short fixed sequence)
/// bounded by the session's socket timeout.
pub trait MailboxClient {
    /// Open a folder read-write; returns the message count
    async fn select(&mut self, mailbox: &str) -> AppResult<u32>;

    /// Open a folder read-only; returns the message count
    async fn examine(&mut self, mailbox: &str) -> AppResult<u32>;

    /// Fetch messages by sequence number range `first..=last`
    async fn fetch_sequence(
        &mut self,
        first: u32,
        last: u32,
        with_source: bool,
    ) -> AppResult<Vec<FetchedRecord>>;

    /// Run a search and return matching UIDs in server order
    async fn search(&mut self, query: &str) -> AppResult<Vec<u32>>;

    /// Fetch messages by UID; UIDs that no longer exist are simply absent
    async fn fetch_uids(&mut self, uids: &[u32], with_source: bool)
    -> AppResult<Vec<FetchedRecord>>;

    async fn add_flag(&mut self, uid: u32, flag: &str) -> AppResult<()>;

    async fn remove_flag(&mut self, uid: u32, flag: &str) -> AppResult<()>;

    async fn move_message(&mut self, uid: u32, mailbox: &str) -> AppResult<()>;

    async fn list_folders(&mut self) -> AppResult<Vec<FolderEntry>>;

    async fn logout(&mut self) -> AppResult<()>;
}

/// Close the session and hand back the operation's own outcome
///
/// Logout failures are logged and dropped so they never replace the result
/// of the work that used the session. A session abandoned by a deadline may
/// still be mid-command, so it gets no LOGOUT; the caller drops the
/// connection instead. Otherwise LOGOUT is bounded by [`LOGOUT_GRACE`].
pub async fn release<C: MailboxClient, T>(client: &mut C, outcome: AppResult<T>) -> AppResult<T> {
    if matches!(outcome, Err(AppError::Timeout(_))) {
        tracing::debug!("dropping mailbox session abandoned by deadline");
        return outcome;
    }
    match timeout(LOGOUT_GRACE, client.logout()).await {
        Ok(Ok(())) => tracing::debug!("mailbox session closed"),
        Ok(Err(error)) => tracing::warn!(%error, "mailbox logout failed"),
        Err(_) => tracing::warn!(
            grace_ms = LOGOUT_GRACE.as_millis() as u64,
            "mailbox logout did not finish; dropping connection"
        ),
    }
    outcome
}
