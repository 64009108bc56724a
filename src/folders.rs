//! Folder enumeration with optional message counts

use utf7_imap::decode_utf7_imap;

use crate::errors::AppResult;
use crate::mailbox::{FolderEntry, MailboxClient};
use crate::models::FolderRecord;

/// List every folder on the server
///
/// With `include_counts`, each folder is examined read-only for its total
/// count. The unread count is always reported as 0. A folder that cannot
/// be examined is still listed, without counts.
///
/// # Errors
///
/// - `Protocol`/`Timeout` if LIST itself fails
pub async fn list<C: MailboxClient>(
    client: &mut C,
    include_counts: bool,
) -> AppResult<Vec<FolderRecord>> {
    let entries = client.list_folders().await?;
    let mut folders = Vec::with_capacity(entries.len());
    for entry in &entries {
        let mut record = FolderRecord {
            name: display_name(entry),
            path: entry.path.clone(),
            unread_count: None,
            total_count: None,
        };
        if include_counts {
            match client.examine(&entry.path).await {
                Ok(total) => {
                    record.total_count = Some(total);
                    record.unread_count = Some(0);
                }
                Err(error) => {
                    tracing::debug!(folder = %entry.path, %error, "skipping folder counts");
                }
            }
        }
        folders.push(record);
    }
    Ok(folders)
}

/// Last hierarchy segment, decoded from modified UTF-7
fn display_name(entry: &FolderEntry) -> String {
    let leaf = match entry.delimiter.as_deref() {
        Some(delim) if !delim.is_empty() => entry
            .path
            .rsplit(delim)
            .next()
            .unwrap_or(entry.path.as_str()),
        _ => entry.path.as_str(),
    };
    decode_utf7_imap(leaf.to_owned())
}
