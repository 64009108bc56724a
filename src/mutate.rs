//! Flag and folder mutations
//!
//! Ids are processed one at a time against a folder opened read-write. A
//! failure on one id is recorded and the remaining ids still run.

use crate::errors::AppResult;
use crate::fetch::parse_uid;
use crate::mailbox::MailboxClient;

const SEEN: &str = "\\Seen";
const FLAGGED: &str = "\\Flagged";

/// Requested changes, applied per id in field order
#[derive(Debug, Clone, Default)]
pub struct MutationRequest {
    pub mark_read: bool,
    pub mark_unread: bool,
    pub flag: bool,
    pub unflag: bool,
    pub move_to_folder: Option<String>,
}

/// Outcome across all ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationReport {
    /// Ids that completed without error
    pub modified: usize,
    pub errors: Vec<String>,
}

impl MutationReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(mut self, id: &str, outcome: AppResult<()>) -> Self {
        match outcome {
            Ok(()) => self.modified += 1,
            Err(e) => {
                tracing::warn!(email_id = id, error = %e, "mutation failed");
                self.errors.push(format!("Failed to modify email {id}: {e}"));
            }
        }
        self
    }
}

/// Apply `request` to every id in `ids`
///
/// # Errors
///
/// Only failing to open `folder` aborts the call; per-id failures land in
/// [`MutationReport::errors`].
pub async fn apply<C: MailboxClient>(
    client: &mut C,
    folder: &str,
    ids: &[String],
    request: &MutationRequest,
) -> AppResult<MutationReport> {
    client.select(folder).await?;

    let mut tally = MutationReport::default();
    for id in ids {
        let outcome = apply_one(client, id, request).await;
        tally = tally.record(id, outcome);
    }
    Ok(tally)
}

async fn apply_one<C: MailboxClient>(
    client: &mut C,
    id: &str,
    request: &MutationRequest,
) -> AppResult<()> {
    let uid = parse_uid(id)?;
    if request.mark_read {
        client.add_flag(uid, SEEN).await?;
    }
    if request.mark_unread {
        client.remove_flag(uid, SEEN).await?;
    }
    if request.flag {
        client.add_flag(uid, FLAGGED).await?;
    }
    if request.unflag {
        client.remove_flag(uid, FLAGGED).await?;
    }
    if let Some(target) = request
        .move_to_folder
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        client.move_message(uid, target).await?;
    }
    Ok(())
}
