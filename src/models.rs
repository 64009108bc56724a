//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Result value returned by every tool
///
/// Failures are reported here with `success=false` and an `error` message
/// rather than as protocol-level faults. On success the payload fields are
/// inlined next to `success`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolResponse<T>
where
    T: JsonSchema,
{
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub meta: Meta,
}

/// Payloads that can report a partial failure while still carrying data
pub trait ToolPayload {
    fn is_success(&self) -> bool {
        true
    }
}

/// Structured search predicates; all present fields are ANDed
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EmailFilters {
    /// Sender address or name substring
    pub from: Option<String>,
    /// Recipient address or name substring
    pub to: Option<String>,
    /// Subject substring
    pub subject: Option<String>,
    /// Accepted but not evaluated server-side
    pub has_attachments: Option<bool>,
    /// `true` for unread only, `false` for read only
    pub is_unread: Option<bool>,
    /// `true` for flagged only; `false` is ignored
    pub is_flagged: Option<bool>,
    /// Messages on or after this date (YYYY-MM-DD or RFC 3339)
    pub after_date: Option<String>,
    /// Messages before this date (YYYY-MM-DD or RFC 3339)
    pub before_date: Option<String>,
}

/// Input: `emails_find`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FindEmailsInput {
    /// Account name (defaults to the configured default account)
    pub account_name: Option<String>,
    /// Free-text query matched anywhere in the message
    pub query: Option<String>,
    /// Structured filters for precise search
    pub filters: Option<EmailFilters>,
    /// Folder to search (default `INBOX`)
    pub folder: Option<String>,
    /// Maximum number of emails to return (1..=100, default 20)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Include the message body
    #[serde(default)]
    pub include_content: bool,
    /// Include attachment content, base64 encoded
    #[serde(default)]
    pub include_attachments: bool,
}

/// Input: `emails_modify`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ModifyEmailsInput {
    pub account_name: Option<String>,
    /// Email ids from `emails_find` results
    pub email_ids: Vec<String>,
    /// Folder holding the emails (default `INBOX`)
    pub folder: Option<String>,
    #[serde(default)]
    pub mark_read: bool,
    #[serde(default)]
    pub mark_unread: bool,
    #[serde(default)]
    pub flag: bool,
    #[serde(default)]
    pub unflag: bool,
    /// Destination folder path (see `folders_list`)
    pub move_to_folder: Option<String>,
}

/// Base64 attachment, supplied on send/respond and returned by `emails_find`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Attachment {
    pub filename: String,
    /// Base64 encoded content
    pub content: String,
    /// MIME type, e.g. `application/pdf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Body format for outgoing messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    Plain,
    #[default]
    Html,
}

/// Input: `email_send`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    pub account_name: Option<String>,
    /// Recipient addresses
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Reply, reply to all, or forward
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    #[default]
    Reply,
    ReplyAll,
    Forward,
}

/// Input: `email_respond`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RespondEmailInput {
    pub account_name: Option<String>,
    /// Id of the email to respond to
    pub email_id: String,
    /// Folder holding the original (default `INBOX`)
    pub folder: Option<String>,
    #[serde(default)]
    pub response_type: ResponseType,
    /// Response message content
    pub body: String,
    #[serde(default)]
    pub body_type: BodyType,
    /// Required for forward; overrides derived recipients for replies
    #[serde(default)]
    pub to: Vec<String>,
    /// Quote the original body (default true)
    #[serde(default = "default_true")]
    pub include_original: bool,
    /// Carry the original's attachments (default true)
    #[serde(default = "default_true")]
    pub include_attachments: bool,
    #[serde(default)]
    pub additional_attachments: Vec<Attachment>,
}

/// Input: `folders_list`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListFoldersInput {
    pub account_name: Option<String>,
    /// Examine each folder for message counts
    #[serde(default)]
    pub include_counts: bool,
}

/// Normalized message as returned by `emails_find`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageRecord {
    /// Server-assigned UID
    pub id: String,
    pub subject: String,
    /// `Display Name <address>`
    pub from: String,
    pub to: Vec<String>,
    /// ISO-8601 UTC
    pub date: String,
    /// First 200 characters of the body as plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// HTML-preferred body (only with `include_content`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub is_unread: bool,
    pub is_flagged: bool,
    pub has_attachments: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

/// Folder as returned by `folders_list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FolderRecord {
    /// Decoded last hierarchy segment
    pub name: String,
    /// Raw server path, usable as a move target
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u32>,
}

/// Output: `emails_find`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FindData {
    pub account: String,
    pub count: usize,
    pub emails: Vec<MessageRecord>,
}

impl ToolPayload for FindData {}

/// Output: `emails_modify`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModifyData {
    pub account: String,
    /// Ids processed without error
    pub modified: usize,
    /// Ids requested
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ToolPayload for ModifyData {
    fn is_success(&self) -> bool {
        self.errors.as_ref().is_none_or(Vec::is_empty)
    }
}

/// Output: `email_send`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendData {
    pub account: String,
    pub message_id: String,
    pub to: Vec<String>,
    pub subject: String,
}

impl ToolPayload for SendData {}

/// Output: `email_respond`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RespondData {
    pub account: String,
    pub message_id: String,
    pub response_type: ResponseType,
    pub original_email_id: String,
}

impl ToolPayload for RespondData {}

/// Output: `folders_list`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FoldersData {
    pub account: String,
    pub count: usize,
    pub folders: Vec<FolderRecord>,
}

impl ToolPayload for FoldersData {}

/// Account metadata (no credentials)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountInfo {
    pub name: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_secure: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_secure: bool,
    pub is_default: bool,
}

/// Output: `accounts_list`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountsData {
    pub default_account: String,
    pub count: usize,
    pub accounts: Vec<AccountInfo>,
}

impl ToolPayload for AccountsData {}

/// Default search limit
fn default_limit() -> usize {
    20
}

fn default_true() -> bool {
    true
}
