//! Message retrieval
//!
//! Two strategies: a recent-window fast path that fetches the last `limit`
//! sequence numbers when the criteria match everything, and a filtered path
//! that searches first and fetches the matching UIDs.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::criteria::SearchCriteria;
use crate::errors::{AppError, AppResult};
use crate::mailbox::{FetchedRecord, MailboxClient};
use crate::mime;
use crate::models::MessageRecord;

/// What to fetch for each matched message
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub limit: usize,
    pub include_content: bool,
    pub include_attachments: bool,
}

impl FetchOptions {
    /// The full source is only pulled when content or attachments are wanted
    fn needs_source(self) -> bool {
        self.include_content || self.include_attachments
    }
}

/// Fetch up to `options.limit` records from `folder`
///
/// # Errors
///
/// - `NotFound` if the folder cannot be opened
/// - `Protocol`/`Timeout` from the underlying session
pub async fn fetch<C: MailboxClient>(
    client: &mut C,
    folder: &str,
    criteria: &SearchCriteria,
    options: FetchOptions,
) -> AppResult<Vec<MessageRecord>> {
    let total = client.examine(folder).await?;
    if options.limit == 0 {
        return Ok(Vec::new());
    }

    if criteria.is_match_all() {
        if total == 0 {
            return Ok(Vec::new());
        }
        return recent_window(client, total, options).await;
    }

    let query = criteria.to_imap_query();
    let uids = client.search(&query).await?;
    tracing::debug!(folder, %query, matched = uids.len(), "search complete");
    let wanted = uids.into_iter().take(options.limit).collect::<Vec<_>>();
    let fetched = client.fetch_uids(&wanted, options.needs_source()).await?;

    let mut records = Vec::with_capacity(wanted.len());
    for raw in &fetched {
        if records.len() >= options.limit {
            break;
        }
        records.push(assemble_record(raw, options)?.record);
    }
    Ok(records)
}

/// Fetch the last `limit` messages by sequence number, newest first
async fn recent_window<C: MailboxClient>(
    client: &mut C,
    total: u32,
    options: FetchOptions,
) -> AppResult<Vec<MessageRecord>> {
    let window = u32::try_from(options.limit).unwrap_or(u32::MAX);
    let first = total.saturating_sub(window).saturating_add(1).max(1);
    let fetched = client
        .fetch_sequence(first, total, options.needs_source())
        .await?;

    let mut dated = fetched
        .iter()
        .map(|raw| assemble_record(raw, options))
        .collect::<AppResult<Vec<_>>>()?;
    dated.sort_by(|a, b| b.epoch.cmp(&a.epoch));
    dated.truncate(options.limit);
    Ok(dated.into_iter().map(|d| d.record).collect())
}

/// Load one message by id with its full source
///
/// Returns `None` if the UID does not exist in `folder`.
///
/// # Errors
///
/// - `Validation` if `id` is not a UID
pub async fn fetch_by_id<C: MailboxClient>(
    client: &mut C,
    folder: &str,
    id: &str,
    include_attachments: bool,
) -> AppResult<Option<MessageRecord>> {
    let uid = parse_uid(id)?;
    client.examine(folder).await?;
    let options = FetchOptions {
        limit: 1,
        include_content: true,
        include_attachments,
    };
    let fetched = client.fetch_uids(&[uid], true).await?;
    fetched
        .iter()
        .find(|raw| raw.uid == uid)
        .map(|raw| assemble_record(raw, options).map(|d| d.record))
        .transpose()
}

/// Parse a caller-supplied email id into a UID
pub fn parse_uid(id: &str) -> AppResult<u32> {
    id.trim()
        .parse::<u32>()
        .ok()
        .filter(|uid| *uid > 0)
        .ok_or_else(|| AppError::invalid(format!("email id '{id}' is not a valid message UID")))
}

/// Record plus the sort key used by the recent window
struct DatedRecord {
    epoch: i64,
    record: MessageRecord,
}

fn assemble_record(raw: &FetchedRecord, options: FetchOptions) -> AppResult<DatedRecord> {
    let summary = mime::parse_header_summary(raw.header_bytes())?;
    let date = summary
        .date
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    let content = match raw.source() {
        Some(source) if options.needs_source() => Some(mime::parse_content(source)?),
        _ => None,
    };
    let (body, attachments) = match content {
        Some(parsed) => (
            options
                .include_content
                .then(|| parsed.body.unwrap_or_default()),
            options
                .include_attachments
                .then_some(parsed.attachments)
                .filter(|a| !a.is_empty()),
        ),
        None => (None, None),
    };

    Ok(DatedRecord {
        epoch: date.timestamp(),
        record: MessageRecord {
            id: raw.uid.to_string(),
            subject: summary
                .subject
                .unwrap_or_else(|| "(No Subject)".to_owned()),
            from: summary.from.unwrap_or_else(|| "Unknown".to_owned()),
            to: summary.to,
            date: date.to_rfc3339_opts(SecondsFormat::Millis, true),
            snippet: body.as_deref().map(mime::snippet),
            body,
            is_unread: !raw.seen,
            is_flagged: raw.flagged,
            has_attachments: raw.has_attachments,
            attachments,
        },
    })
}
